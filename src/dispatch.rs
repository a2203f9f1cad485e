//! Request handlers and the command dispatch table.
//!
//! A [`Handler`] turns one decoded request into an optional reply. The server
//! owns exactly one handler; routing several commands through one endpoint is
//! done with a [`CommandTable`], which maps the string at a command key
//! (for example `"dmd"` in `{"dmd": "start"}`) to a handler.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;

use crate::models::Status;

/// Something that answers pipe requests.
///
/// Handlers run on the blocking thread pool, so they may block briefly
/// (joining a worker thread, talking to a serial device).
pub trait Handler: Send + Sync {
    /// Handle one request.
    ///
    /// `Ok(None)` lets the server send its default `{"status": "ok"}`.
    /// An `Err` is reported to the client as `{"error": "<message>"}`.
    fn handle(&self, message: &Value) -> Result<Option<Value>>;

    /// Called once when the server stops.
    fn shutdown(&self) {}
}

impl<F> Handler for F
where
    F: Fn(&Value) -> Result<Option<Value>> + Send + Sync,
{
    fn handle(&self, message: &Value) -> Result<Option<Value>> {
        self(message)
    }
}

/// Replies with the request unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&self, message: &Value) -> Result<Option<Value>> {
        Ok(Some(message.clone()))
    }
}

/// Routes requests by the string value stored under a command key.
pub struct CommandTable {
    key: String,
    routes: HashMap<String, Box<dyn Handler>>,
}

impl CommandTable {
    /// Empty table dispatching on `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            routes: HashMap::new(),
        }
    }

    /// Register `handler` for `command`, replacing any previous route.
    pub fn route(mut self, command: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.routes.insert(command.into(), Box::new(handler));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Registered commands, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }
}

impl Handler for CommandTable {
    fn handle(&self, message: &Value) -> Result<Option<Value>> {
        let Some(command) = message.get(&self.key).and_then(Value::as_str) else {
            return Ok(Some(Status::CommandMissing.reply()));
        };

        match self.routes.get(command) {
            Some(handler) => {
                tracing::debug!("Dispatching {}={}", self.key, command);
                handler.handle(message)
            }
            None => Ok(Some(Status::CommandUnknown.reply())),
        }
    }

    fn shutdown(&self) {
        for handler in self.routes.values() {
            handler.shutdown();
        }
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("key", &self.key)
            .field("commands", &self.commands())
            .finish()
    }
}
