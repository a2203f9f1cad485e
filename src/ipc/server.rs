//! Named-pipe server answering newline-delimited JSON requests.
//!
//! The server accepts one client at a time. For every request line it calls
//! the registered [`Handler`] and writes exactly one reply line:
//!
//! - the handler's value, or `{"status": "ok"}` when it returns `None`
//! - `{"error": "<message>"}` when the line is not JSON or the handler fails
//!
//! A client hanging up ends its session; the server then waits for the next
//! client until it is stopped.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::dispatch::Handler;
use crate::ipc::endpoint::Endpoint;
use crate::ipc::framing::{is_line_too_long, read_line_bounded, write_line};
use crate::ipc::transport::PipeListener;
use crate::models::{error_reply, Status};

/// Largest request line accepted, terminator included.
pub const MAX_REQUEST_SIZE: u64 = 64 * 1024;

/// How long `stop` waits for the listen loop to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Back-off after a failed accept, to avoid a busy loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// A server bound to one endpoint, not yet listening.
pub struct PipeServer {
    endpoint: Endpoint,
    handler: Arc<dyn Handler>,
}

impl PipeServer {
    pub fn new(endpoint: Endpoint, handler: impl Handler + 'static) -> Self {
        Self {
            endpoint,
            handler: Arc::new(handler),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Bind the endpoint and start listening on the current tokio runtime.
    ///
    /// Returns immediately; the listen loop runs as a spawned task.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be bound, e.g. because another
    /// server already owns it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self) -> io::Result<ServerHandle> {
        let listener = PipeListener::bind(&self.endpoint)?;
        let (stop_tx, stop_rx) = watch::channel(false);

        tracing::info!("Listening on {}", self.endpoint);
        let task = tokio::spawn(listen(
            listener,
            self.endpoint.clone(),
            Arc::clone(&self.handler),
            stop_rx,
        ));

        Ok(ServerHandle {
            endpoint: self.endpoint,
            handler: self.handler,
            stop_tx,
            task: Some(task),
        })
    }
}

/// Owning handle of a running server.
///
/// Dropping the handle without calling [`ServerHandle::stop`] aborts the
/// listen loop without running the handler's shutdown hook.
pub struct ServerHandle {
    endpoint: Endpoint,
    handler: Arc<dyn Handler>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the listen loop is still running.
    pub fn is_alive(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop listening, run the handler's shutdown hook and wait for the loop.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);

        let handler = Arc::clone(&self.handler);
        if let Err(e) = tokio::task::spawn_blocking(move || handler.shutdown()).await {
            tracing::error!("Handler shutdown panicked: {}", e);
        }

        if let Some(mut task) = self.task.take() {
            if timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!("Server on {} did not stop in time; aborting", self.endpoint);
                task.abort();
            }
        }

        tracing::info!("Stopped listening on {}", self.endpoint);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.stop_tx.send(true);
            task.abort();
        }
    }
}

async fn listen(
    mut listener: PipeListener,
    endpoint: Endpoint,
    handler: Arc<dyn Handler>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop_rx.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => accepted,
        };

        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Accept on {} failed: {}", endpoint, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        tracing::debug!("Client connected to {}", endpoint);
        tokio::select! {
            _ = stop_rx.wait_for(|stop| *stop) => break,
            served = serve_client(stream, &handler) => {
                if let Err(e) = served {
                    tracing::warn!("Session on {} ended with error: {}", endpoint, e);
                }
            }
        }
        tracing::debug!("Client disconnected from {}", endpoint);
    }
}

/// Errors that just mean the client went away.
fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

/// Answer request lines until the client hangs up.
async fn serve_client<S>(stream: S, handler: &Arc<dyn Handler>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);

    loop {
        let reply = match read_line_bounded(&mut stream, MAX_REQUEST_SIZE).await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<Value>(&line) {
                Ok(message) => dispatch(handler, message).await,
                Err(e) => {
                    tracing::debug!("Rejecting malformed request: {}", e);
                    error_reply(e)
                }
            },
            Ok(None) => return Ok(()),
            Err(e) if is_disconnect(&e) => return Ok(()),
            Err(e) if is_line_too_long(&e) => {
                // The rest of the offending line is still unread; give up on this client
                let _ = write_line(&mut stream, &error_reply(&e)).await;
                return Err(e);
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                tracing::debug!("Rejecting undecodable request: {}", e);
                error_reply(e)
            }
            Err(e) => return Err(e),
        };

        match write_line(&mut stream, &reply).await {
            Ok(()) => {}
            Err(e) if is_disconnect(&e) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Run the handler on the blocking pool and turn its outcome into a reply.
async fn dispatch(handler: &Arc<dyn Handler>, message: Value) -> Value {
    let handler = Arc::clone(handler);
    match tokio::task::spawn_blocking(move || handler.handle(&message)).await {
        Ok(Ok(Some(reply))) => reply,
        Ok(Ok(None)) => Status::Ok.reply(),
        Ok(Err(e)) => {
            tracing::warn!("Handler failed: {:#}", e);
            error_reply(format!("{:#}", e))
        }
        Err(e) => {
            tracing::error!("Handler panicked: {}", e);
            error_reply("handler panicked")
        }
    }
}
