//! Background work that can be started and stopped over the pipe.
//!
//! `CancellableTask` runs a function on its own thread. The function receives
//! a [`StopSignal`] and is expected to return soon after it is set, e.g. a
//! pattern-sequence player checking the signal between frames.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;

use crate::dispatch::Handler;
use crate::models::Status;

/// How long `stop` waits for the worker thread to finish.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the worker to finish.
const SLEEP_TIME: Duration = Duration::from_millis(10);

type TaskFn = dyn Fn(&StopSignal) -> Result<()> + Send + Sync;

/// A settable flag that workers can poll or wait on.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        // A poisoned flag is still a valid bool
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raise the signal and wake every waiter.
    pub fn set(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
    }

    pub fn clear(&self) {
        *self.flag() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag()
    }

    /// Sleep up to `timeout`, returning early if the signal is raised.
    ///
    /// Returns `true` if the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.flag();
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Command words understood by a task when used as a [`Handler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommands {
    /// Request field carrying the command, e.g. `cmd` or `dmd`
    pub key: String,
    pub start: String,
    pub stop: String,
}

impl Default for TaskCommands {
    fn default() -> Self {
        Self {
            key: "cmd".to_string(),
            start: "start".to_string(),
            stop: "stop".to_string(),
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    stop: StopSignal,
}

/// Runs a function on a dedicated thread, at most one run at a time.
///
/// # Example
///
/// ```ignore
/// let task = CancellableTask::new(|stop| {
///     while !stop.wait_timeout(Duration::from_millis(500)) {
///         tracing::info!("tick");
///     }
///     Ok(())
/// });
/// assert_eq!(task.start(), Status::Started);
/// assert_eq!(task.stop(), Status::Stopped);
/// ```
pub struct CancellableTask {
    func: Arc<TaskFn>,
    commands: TaskCommands,
    worker: Mutex<Option<Worker>>,
}

impl CancellableTask {
    /// Task controlled by `{"cmd": "start"}` / `{"cmd": "stop"}`.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&StopSignal) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            commands: TaskCommands::default(),
            worker: Mutex::new(None),
        }
    }

    /// Use different command words, e.g. `{"dmd": "start"}`.
    pub fn with_commands(mut self, commands: TaskCommands) -> Self {
        self.commands = commands;
        self
    }

    pub fn commands(&self) -> &TaskCommands {
        &self.commands
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.worker()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Start a run unless one is already in progress.
    pub fn start(&self) -> Status {
        let mut slot = self.worker();

        if let Some(worker) = slot.as_ref() {
            if !worker.handle.is_finished() {
                return Status::AlreadyRunning;
            }
        }
        // Reap a finished run so the task can be restarted
        if let Some(finished) = slot.take() {
            reap(finished.handle);
        }

        let stop = StopSignal::new();
        let func = Arc::clone(&self.func);
        let signal = stop.clone();

        let spawned = thread::Builder::new()
            .name("cancellable-task".to_string())
            .spawn(move || {
                if let Err(e) = func(&signal) {
                    tracing::error!("Cancellable task failed: {:#}", e);
                }
                signal.set();
            });

        match spawned {
            Ok(handle) => {
                *slot = Some(Worker { handle, stop });
                tracing::info!("Cancellable task started");
                Status::Started
            }
            Err(e) => {
                tracing::error!("Failed to spawn task thread: {}", e);
                Status::NotRunning
            }
        }
    }

    /// Signal the run to stop and wait up to [`STOP_TIMEOUT`] for it.
    pub fn stop(&self) -> Status {
        let worker = {
            let mut slot = self.worker();
            let running = slot
                .as_ref()
                .is_some_and(|worker| !worker.handle.is_finished());
            if running {
                slot.take()
            } else {
                None
            }
        };

        let Some(worker) = worker else {
            return Status::NotRunning;
        };

        worker.stop.set();

        let deadline = Instant::now() + STOP_TIMEOUT;
        while !worker.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(SLEEP_TIME);
        }

        if worker.handle.is_finished() {
            reap(worker.handle);
        } else {
            tracing::warn!(
                "Task did not stop within {:?}; detaching its thread",
                STOP_TIMEOUT
            );
        }

        tracing::info!("Cancellable task stopped");
        Status::Stopped
    }
}

/// Join a finished worker, logging a panic instead of propagating it.
fn reap(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!("Cancellable task panicked");
    }
}

impl Handler for CancellableTask {
    fn handle(&self, message: &Value) -> Result<Option<Value>> {
        let Some(command) = message.get(&self.commands.key) else {
            return Ok(Some(Status::CommandMissing.reply()));
        };

        let status = match command.as_str() {
            Some(c) if c == self.commands.start => self.start(),
            Some(c) if c == self.commands.stop => self.stop(),
            _ => Status::CommandUnknown,
        };
        Ok(Some(status.reply()))
    }

    fn shutdown(&self) {
        self.stop();
    }
}

impl Drop for CancellableTask {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().as_ref() {
            worker.stop.set();
        }
    }
}
