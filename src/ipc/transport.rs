//! Platform transport behind an [`Endpoint`].
//!
//! Windows uses real named pipes. Unix uses a domain socket whose path is
//! derived from the pipe name.

use std::io;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::ipc::endpoint::Endpoint;

/// Delay between connection attempts while the endpoint is absent or busy.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[cfg(unix)]
pub(crate) type ClientStream = tokio::net::UnixStream;

#[cfg(windows)]
pub(crate) type ClientStream = tokio::net::windows::named_pipe::NamedPipeClient;

#[cfg(unix)]
pub(crate) type ServerStream = tokio::net::UnixStream;

#[cfg(windows)]
pub(crate) type ServerStream = tokio::net::windows::named_pipe::NamedPipeServer;

/// `ERROR_PIPE_BUSY`: every instance of the pipe is serving another client.
#[cfg(windows)]
const ERROR_PIPE_BUSY: i32 = 231;

/// Whether a failed attempt may succeed later within the same deadline.
///
/// A missing endpoint or a busy pipe is waited out, mirroring a named-pipe
/// `Connect(timeout)`. Anything else, including refusal, fails immediately.
fn is_transient(err: &io::Error) -> bool {
    #[cfg(windows)]
    {
        if err.raw_os_error() == Some(ERROR_PIPE_BUSY) {
            return true;
        }
    }
    err.kind() == io::ErrorKind::NotFound
}

#[cfg(unix)]
async fn try_connect(endpoint: &Endpoint) -> io::Result<ClientStream> {
    tokio::net::UnixStream::connect(endpoint.socket_path()).await
}

#[cfg(windows)]
async fn try_connect(endpoint: &Endpoint) -> io::Result<ClientStream> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(endpoint.pipe_path())
}

/// Open a duplex connection, giving up once `connect_timeout` has elapsed.
///
/// # Errors
///
/// Returns the last connection error, or `ErrorKind::TimedOut` when the
/// deadline passes while an attempt is still pending.
pub(crate) async fn connect(endpoint: &Endpoint, connect_timeout: Duration) -> io::Result<ClientStream> {
    let deadline = Instant::now() + connect_timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let attempt = tokio::time::timeout(remaining, try_connect(endpoint)).await;

        let err = match attempt {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => err,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {}ms", connect_timeout.as_millis()),
                ))
            }
        };

        if !is_transient(&err) || Instant::now() + CONNECT_POLL_INTERVAL >= deadline {
            return Err(err);
        }

        tracing::trace!("Endpoint {} not ready ({}), retrying", endpoint, err);
        sleep(CONNECT_POLL_INTERVAL).await;
    }
}

/// Listening side of an endpoint; accepts one client at a time.
#[cfg(unix)]
pub(crate) struct PipeListener {
    listener: tokio::net::UnixListener,
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl PipeListener {
    /// Bind the endpoint's socket, removing a stale socket file first.
    ///
    /// A socket file that still accepts connections belongs to a live server
    /// and is left alone; binding then fails with `AddrInUse`. Anything at the
    /// path that is not a socket is never touched and fails with `AlreadyExists`.
    pub(crate) fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        use std::os::unix::fs::FileTypeExt;

        let path = endpoint.socket_path();

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if !metadata.file_type().is_socket() => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                ));
            }
            Ok(_) => {
                if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("{} is already being served", endpoint),
                    ));
                }
                tracing::debug!("Removing stale socket {}", path.display());
                std::fs::remove_file(&path)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = tokio::net::UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    pub(crate) async fn accept(&mut self) -> io::Result<ServerStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }
}

#[cfg(unix)]
impl Drop for PipeListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Listening side of an endpoint; accepts one client at a time.
#[cfg(windows)]
pub(crate) struct PipeListener {
    pipe_path: String,
    pending: Option<ServerStream>,
}

#[cfg(windows)]
impl PipeListener {
    /// Create the first (and only) instance of the pipe.
    ///
    /// Fails if another process already owns the pipe name.
    pub(crate) fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        let pipe_path = endpoint.pipe_path();
        let first = Self::create(&pipe_path, true)?;
        Ok(Self {
            pipe_path,
            pending: Some(first),
        })
    }

    fn create(pipe_path: &str, first: bool) -> io::Result<ServerStream> {
        tokio::net::windows::named_pipe::ServerOptions::new()
            .first_pipe_instance(first)
            .max_instances(1)
            .create(pipe_path)
    }

    /// Wait for a client on a fresh pipe instance.
    ///
    /// The previous instance must have been dropped, as only one may exist.
    pub(crate) async fn accept(&mut self) -> io::Result<ServerStream> {
        let server = match self.pending.take() {
            Some(server) => server,
            None => Self::create(&self.pipe_path, false)?,
        };
        server.connect().await?;
        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_endpoint_is_transient() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "no such file");
        assert!(is_transient(&missing));

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_transient(&refused));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_missing_endpoint_honours_deadline() {
        let endpoint = Endpoint::from_name(&format!("transport-missing-{}", std::process::id())).unwrap();
        let timeout = Duration::from_millis(150);

        let started = std::time::Instant::now();
        let result = connect(&endpoint, timeout).await;
        let elapsed = started.elapsed();

        assert!(result.is_err());
        assert!(elapsed < timeout + Duration::from_millis(500), "took {elapsed:?}");
    }

    #[cfg(unix)]
    #[test]
    fn test_bind_leaves_regular_file_alone() {
        let endpoint = Endpoint::from_name(&format!("transport-file-{}", std::process::id())).unwrap();
        let path = endpoint.socket_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "user data").unwrap();

        let err = PipeListener::bind(&endpoint).err().expect("Bind should refuse");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "user data");

        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let endpoint = Endpoint::from_name(&format!("transport-stale-{}", std::process::id())).unwrap();
        let path = endpoint.socket_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let _ = std::fs::remove_file(&path);

        // A bound std listener dropped without unlinking leaves a dead socket file
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = PipeListener::bind(&endpoint).expect("Stale socket should be replaced");
        drop(listener);
        assert!(!path.exists());
    }
}
