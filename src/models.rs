//! Message shapes exchanged over the pipe.
//!
//! Requests are free-form JSON. Replies produced by this crate follow a
//! small set of conventions shared with the MATLAB scripts: `{"status": ...}`
//! for acknowledgements and `{"error": ...}` for failures.

use serde::Serialize;
use serde_json::{json, Value};

/// Error text of the sentinel returned for an empty reply line.
pub const EMPTY_RESPONSE: &str = "empty_response";

/// Sentinel reply for a peer that answered with a blank line.
pub fn empty_response() -> Value {
    json!({ "error": EMPTY_RESPONSE })
}

/// Whether `reply` is the empty-line sentinel.
pub fn is_empty_response(reply: &Value) -> bool {
    reply.get("error").and_then(Value::as_str) == Some(EMPTY_RESPONSE)
}

/// Acknowledgement states reported by the server and its handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Request handled, nothing else to report
    Ok,
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
    /// The request carried no usable command field
    CommandMissing,
    /// The command is not registered
    CommandUnknown,
}

impl Status {
    /// Wire spelling, e.g. `already_running`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Started => "started",
            Status::AlreadyRunning => "already_running",
            Status::Stopped => "stopped",
            Status::NotRunning => "not_running",
            Status::CommandMissing => "command_missing",
            Status::CommandUnknown => "command_unknown",
        }
    }

    /// `{"status": "<state>"}`.
    pub fn reply(self) -> Value {
        json!({ "status": self.as_str() })
    }
}

/// `{"error": "<message>"}`.
pub fn error_reply(message: impl std::fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}
