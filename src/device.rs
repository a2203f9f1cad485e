//! Owning slot for a hardware handle.
//!
//! Vendor drivers (DMD, camera, serial stage) hold OS resources that must be
//! released explicitly. A `DeviceSlot` owns at most one live handle for a
//! physical device: opening twice is an error, and the handle is closed when
//! the slot is closed or dropped.

use thiserror::Error;

/// A hardware handle with an explicit release step.
pub trait Device {
    /// Release the underlying resource.
    fn close(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0} is already open")]
    AlreadyOpen(&'static str),

    #[error("{0} is not open")]
    NotOpen(&'static str),

    #[error("Failed to open {label}: {cause:#}")]
    Open {
        label: &'static str,
        cause: anyhow::Error,
    },

    #[error("Failed to close {label}: {cause:#}")]
    Close {
        label: &'static str,
        cause: anyhow::Error,
    },
}

/// Holds at most one live handle of type `D`.
#[derive(Debug)]
pub struct DeviceSlot<D: Device> {
    label: &'static str,
    device: Option<D>,
}

impl<D: Device> DeviceSlot<D> {
    /// Empty slot; `label` names the device in errors and logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            device: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Open the device with `connect`, unless a handle is already live.
    ///
    /// # Errors
    ///
    /// `DeviceError::AlreadyOpen` if the slot is occupied (in which case
    /// `connect` is not called), `DeviceError::Open` if `connect` fails.
    pub fn open<F>(&mut self, connect: F) -> Result<&mut D, DeviceError>
    where
        F: FnOnce() -> anyhow::Result<D>,
    {
        if self.device.is_some() {
            return Err(DeviceError::AlreadyOpen(self.label));
        }

        let device = connect().map_err(|cause| DeviceError::Open {
            label: self.label,
            cause,
        })?;
        tracing::info!("Opened {}", self.label);
        Ok(self.device.insert(device))
    }

    pub fn get(&self) -> Result<&D, DeviceError> {
        self.device.as_ref().ok_or(DeviceError::NotOpen(self.label))
    }

    pub fn get_mut(&mut self) -> Result<&mut D, DeviceError> {
        self.device.as_mut().ok_or(DeviceError::NotOpen(self.label))
    }

    /// Close and release the live handle. Closing an empty slot is a no-op.
    ///
    /// The slot is emptied even if the driver reports an error.
    pub fn close(&mut self) -> Result<(), DeviceError> {
        let Some(mut device) = self.device.take() else {
            return Ok(());
        };

        device.close().map_err(|cause| DeviceError::Close {
            label: self.label,
            cause,
        })?;
        tracing::info!("Closed {}", self.label);
        Ok(())
    }
}

impl<D: Device> Drop for DeviceSlot<D> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct FakeDmd {
        closed: Rc<Cell<u32>>,
        fail_close: bool,
    }

    impl Device for FakeDmd {
        fn close(&mut self) -> anyhow::Result<()> {
            self.closed.set(self.closed.get() + 1);
            if self.fail_close {
                anyhow::bail!("USB handle already released");
            }
            Ok(())
        }
    }

    fn fake(closed: &Rc<Cell<u32>>) -> FakeDmd {
        FakeDmd {
            closed: closed.clone(),
            fail_close: false,
        }
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let closed = Rc::new(Cell::new(0));
        let mut slot = DeviceSlot::new("DMD");

        slot.open(|| Ok(fake(&closed))).unwrap();
        assert!(slot.is_open());

        let mut called = false;
        let err = slot
            .open(|| {
                called = true;
                Ok(fake(&closed))
            })
            .unwrap_err();
        assert!(matches!(err, DeviceError::AlreadyOpen("DMD")));
        assert!(!called);
    }

    #[test]
    fn test_get_requires_open() {
        let mut slot: DeviceSlot<FakeDmd> = DeviceSlot::new("DMD");
        assert!(matches!(slot.get(), Err(DeviceError::NotOpen("DMD"))));
        assert!(matches!(slot.get_mut(), Err(DeviceError::NotOpen("DMD"))));
        assert_eq!(slot.get().unwrap_err().to_string(), "DMD is not open");
    }

    #[test]
    fn test_failed_open_leaves_slot_empty() {
        let mut slot: DeviceSlot<FakeDmd> = DeviceSlot::new("camera");
        let err = slot.open(|| anyhow::bail!("no camera on bus")).unwrap_err();
        assert_eq!(err.to_string(), "Failed to open camera: no camera on bus");
        assert!(!slot.is_open());
    }

    #[test]
    fn test_close_then_reopen() {
        let closed = Rc::new(Cell::new(0));
        let mut slot = DeviceSlot::new("DMD");

        slot.open(|| Ok(fake(&closed))).unwrap();
        slot.close().unwrap();
        assert_eq!(closed.get(), 1);
        assert!(!slot.is_open());

        // Closing an empty slot does nothing
        slot.close().unwrap();
        assert_eq!(closed.get(), 1);

        slot.open(|| Ok(fake(&closed))).unwrap();
        assert!(slot.is_open());
    }

    #[test]
    fn test_close_error_still_empties_slot() {
        let closed = Rc::new(Cell::new(0));
        let mut slot = DeviceSlot::new("stage");
        slot.open(|| {
            Ok(FakeDmd {
                closed: closed.clone(),
                fail_close: true,
            })
        })
        .unwrap();

        let err = slot.close().unwrap_err();
        assert!(matches!(err, DeviceError::Close { label: "stage", .. }));
        assert!(!slot.is_open());
    }

    #[test]
    fn test_drop_closes_live_handle() {
        let closed = Rc::new(Cell::new(0));
        {
            let mut slot = DeviceSlot::new("DMD");
            slot.open(|| Ok(fake(&closed))).unwrap();
        }
        assert_eq!(closed.get(), 1);
    }
}
