//! One-shot JSON client for named-pipe endpoints.
//!
//! This module provides `PipeClient`, which opens a fresh connection for every
//! message, writes one JSON line, blocks for one reply line and closes the
//! connection again. There is no connection reuse and no retry.

use std::io;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::time::timeout;

use crate::config::PipeConfig;
use crate::ipc::endpoint::Endpoint;
use crate::ipc::framing::{decode_reply, read_line, write_line};
use crate::ipc::transport;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Errors surfaced by [`PipeClient`].
///
/// The connection, if one was opened, is always closed before any of these
/// reach the caller.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The endpoint string does not follow `\\.\pipe\<name>`. No I/O was attempted.
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The rejected endpoint string
        endpoint: String,
        /// Why it was rejected
        reason: String,
    },

    /// The channel could not be opened within the connect timeout.
    #[error("Connection to {endpoint} failed: {source}")]
    ConnectFailed {
        /// Endpoint that was dialled
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Writing the request, reading the reply or decoding it failed.
    #[error("I/O error on {endpoint}: {source}")]
    Io {
        /// Endpoint of the live connection
        endpoint: String,
        #[source]
        source: io::Error,
    },
}

impl IpcError {
    /// The endpoint string the failing call was addressed to.
    pub fn endpoint(&self) -> &str {
        match self {
            IpcError::InvalidEndpoint { endpoint, .. }
            | IpcError::ConnectFailed { endpoint, .. }
            | IpcError::Io { endpoint, .. } => endpoint,
        }
    }
}

/// Client for the newline-delimited JSON pipe protocol.
///
/// The client itself holds only settings. Each call owns its connection
/// exclusively and for that call only, so a `PipeClient` can be shared
/// freely; overlapping calls simply open independent connections.
///
/// # Example
///
/// ```ignore
/// use matpy_pipe::ipc::PipeClient;
/// use serde_json::json;
///
/// let client = PipeClient::new();
/// let reply = client.send(&json!({"dmd": "start"}), r"\\.\pipe\MatPy").await?;
/// if reply["error"] == "empty_response" {
///     // the peer answered with a blank line
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PipeClient {
    /// Endpoint used by `send_default`.
    endpoint: Endpoint,
    /// Upper bound on establishing the connection.
    connect_timeout: Duration,
    /// Optional upper bound on waiting for the reply line.
    read_timeout: Option<Duration>,
}

impl Default for PipeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeClient {
    /// Client with the default endpoint, a 1000 ms connect timeout and no
    /// read timeout.
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
        }
    }

    /// Client configured from a [`PipeConfig`].
    pub fn from_config(config: &PipeConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Bound the wait for the reply line.
    ///
    /// Without a read timeout a peer that accepts the connection but never
    /// answers blocks the call indefinitely.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// The endpoint used by [`PipeClient::send_default`].
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Send one message to `endpoint` and wait for the reply.
    ///
    /// # Errors
    ///
    /// - `IpcError::InvalidEndpoint` if `endpoint` is malformed (nothing is dialled)
    /// - `IpcError::ConnectFailed` if the channel cannot be opened in time
    /// - `IpcError::Io` if the exchange or reply decoding fails
    pub async fn send<T>(&self, request: &T, endpoint: &str) -> Result<Value, IpcError>
    where
        T: Serialize + ?Sized,
    {
        let endpoint = Endpoint::parse(endpoint)?;
        self.send_to(request, &endpoint).await
    }

    /// Send one message to the client's configured endpoint.
    pub async fn send_default<T>(&self, request: &T) -> Result<Value, IpcError>
    where
        T: Serialize + ?Sized,
    {
        self.send_to(request, &self.endpoint).await
    }

    /// Send one message to an already validated endpoint.
    pub async fn send_to<T>(&self, request: &T, endpoint: &Endpoint) -> Result<Value, IpcError>
    where
        T: Serialize + ?Sized,
    {
        let io_error = |source: io::Error| IpcError::Io {
            endpoint: endpoint.to_string(),
            source,
        };

        // Serialize before dialling so a bad request never touches the pipe
        let request = serde_json::to_value(request)
            .map_err(|e| io_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let started = Instant::now();
        let stream = transport::connect(endpoint, self.connect_timeout)
            .await
            .map_err(|source| IpcError::ConnectFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;

        // The stream is moved into the exchange and dropped there, on every path
        let reply = exchange(stream, &request, self.read_timeout)
            .await
            .map_err(io_error)?;

        tracing::debug!(
            "Pipe exchange with {} completed in {:?}",
            endpoint,
            started.elapsed()
        );
        Ok(reply)
    }

    /// Blocking variant of [`PipeClient::send`] for synchronous callers.
    ///
    /// Drives the call on a private current-thread runtime.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a tokio runtime; async code should use
    /// [`PipeClient::send`] instead.
    pub fn send_blocking<T>(&self, request: &T, endpoint: &str) -> Result<Value, IpcError>
    where
        T: Serialize + ?Sized,
    {
        let endpoint = Endpoint::parse(endpoint)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| IpcError::Io {
                endpoint: endpoint.to_string(),
                source,
            })?;
        runtime.block_on(self.send_to(request, &endpoint))
    }
}

/// Send one message with a default client.
///
/// `endpoint` of `None` addresses `\\.\pipe\MatPy`.
pub async fn send_message<T>(request: &T, endpoint: Option<&str>) -> Result<Value, IpcError>
where
    T: Serialize + ?Sized,
{
    let client = PipeClient::new();
    match endpoint {
        Some(endpoint) => client.send(request, endpoint).await,
        None => client.send_default(request).await,
    }
}

/// Write the request line and read exactly one reply line.
async fn exchange<S>(stream: S, request: &Value, read_timeout: Option<Duration>) -> io::Result<Value>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);

    write_line(&mut stream, request).await?;

    let line = match read_timeout {
        Some(limit) => timeout(limit, read_line(&mut stream)).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply within {}ms", limit.as_millis()),
            )
        })??,
        None => read_line(&mut stream).await?,
    };

    let line = line.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a reply was received",
        )
    })?;

    decode_reply(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
