//! MatPy pipe library
//!
//! This library provides the messaging layer between the MATLAB scripts that
//! drive the stimulation rig and the processes that control its hardware:
//!
//! - `ipc` - one-shot JSON client and line-oriented server over named pipes
//! - `dispatch` - request handlers and the command dispatch table
//! - `task` - background work started and stopped over the pipe
//! - `device` - owning slot for hardware handles
//! - `config` - endpoint and timeout settings
//! - `models` - reply conventions shared with the MATLAB side
//!
//! # IPC Module
//!
//! ```ignore
//! use matpy_pipe::ipc::send_message;
//! use serde_json::json;
//!
//! let reply = send_message(&json!({"dmd": "start"}), None).await?;
//! ```

pub mod config;
pub mod device;
pub mod dispatch;
pub mod ipc;
pub mod models;
pub mod task;
