//! Named-pipe messaging between the MATLAB front end and the rig back end.
//!
//! This module provides both ends of a one-shot JSON exchange over a named
//! duplex channel: `PipeClient` (connect, write one line, read one line,
//! close) and `PipeServer` (accept one client at a time and answer every
//! request line with exactly one reply line).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     \\.\pipe\MatPy       ┌─────────────────────┐
//! │  MATLAB / CLI   │  ◄────────────────────►  │   rig back end      │
//! │  (PipeClient)   │  newline-delimited JSON  │   (PipeServer)      │
//! └─────────────────┘                          └─────────────────────┘
//! ```
//!
//! On Windows the endpoint is a real named pipe. Elsewhere it maps to a
//! Unix domain socket (see [`Endpoint::socket_path`]).
//!
//! # Protocol
//!
//! One JSON value per line, no length prefix, no BOM:
//!
//! ```text
//! {"dmd":"start"}\n
//! {"status":"started"}\n
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use matpy_pipe::ipc::PipeClient;
//! use serde_json::json;
//!
//! let client = PipeClient::new();
//! let reply = client.send(&json!({"dmd": "start"}), r"\\.\pipe\MatPy").await?;
//! ```

mod client;
mod endpoint;
mod framing;
mod server;
mod transport;

pub use client::{send_message, IpcError, PipeClient, DEFAULT_CONNECT_TIMEOUT};
pub use endpoint::{Endpoint, DEFAULT_PIPE_NAME, PIPE_PREFIX};
pub use framing::{decode_reply, read_line, write_line};
pub use server::{PipeServer, ServerHandle, MAX_REQUEST_SIZE};
