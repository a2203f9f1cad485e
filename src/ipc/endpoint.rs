//! Endpoint identifiers of the form `\\.\pipe\<name>`.
//!
//! The Windows naming convention is used on every platform so that MATLAB
//! scripts, the CLI and the server agree on one spelling. On Unix the name is
//! mapped onto a domain socket in a per-user runtime directory.

use std::fmt;
use std::str::FromStr;

#[cfg(unix)]
use std::path::PathBuf;

use crate::ipc::client::IpcError;

/// Prefix every endpoint string must carry.
pub const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Channel name used when the caller does not pick one.
pub const DEFAULT_PIPE_NAME: &str = "MatPy";

/// A validated named-channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    name: String,
}

impl Endpoint {
    /// Parse an endpoint string such as `\\.\pipe\MatPy`.
    ///
    /// The `pipe` segment is matched case-insensitively, as Windows does. The
    /// channel name must be non-empty and must not contain path separators.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::InvalidEndpoint` when the string does not follow
    /// the pattern. No I/O is performed.
    pub fn parse(raw: &str) -> Result<Self, IpcError> {
        let invalid = |reason: &str| IpcError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: reason.to_string(),
        };

        let prefix_len = PIPE_PREFIX.len();
        let has_prefix = raw.len() >= prefix_len
            && raw.is_char_boundary(prefix_len)
            && raw[..prefix_len].eq_ignore_ascii_case(PIPE_PREFIX);
        if !has_prefix {
            return Err(invalid(r"expected a path of the form \\.\pipe\<name>"));
        }

        let name = &raw[prefix_len..];
        if name.is_empty() {
            return Err(invalid("pipe name is empty"));
        }
        if name.contains(['\\', '/', '\0']) {
            return Err(invalid("pipe name must not contain path separators"));
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Build an endpoint directly from a channel name.
    pub fn from_name(name: &str) -> Result<Self, IpcError> {
        Self::parse(&format!("{PIPE_PREFIX}{name}"))
    }

    /// The channel name, e.g. `MatPy`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The Windows pipe path, e.g. `\\.\pipe\MatPy`.
    pub fn pipe_path(&self) -> String {
        format!("{PIPE_PREFIX}{}", self.name)
    }

    /// Domain socket backing this endpoint on Unix.
    ///
    /// Resolution order for the directory:
    /// 1. `$MATPY_PIPE_DIR`
    /// 2. `$XDG_RUNTIME_DIR` (Linux standard, per-user)
    /// 3. the platform cache dir (`~/Library/Caches` on macOS)
    /// 4. `/tmp`
    #[cfg(unix)]
    pub fn socket_path(&self) -> PathBuf {
        socket_dir().join(format!("{}.pipe", self.name))
    }
}

#[cfg(unix)]
fn socket_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(crate::config::PIPE_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir);
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir;
    }

    PathBuf::from("/tmp")
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            name: DEFAULT_PIPE_NAME.to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PIPE_PREFIX}{}", self.name)
    }
}

impl FromStr for Endpoint {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_name() {
        let endpoint = Endpoint::parse(r"\\.\pipe\MatPy").unwrap();
        assert_eq!(endpoint.name(), "MatPy");

        let endpoint = Endpoint::parse(r"\\.\pipe\rig-2.stim_ctl").unwrap();
        assert_eq!(endpoint.name(), "rig-2.stim_ctl");
    }

    #[test]
    fn test_parse_prefix_is_case_insensitive() {
        let endpoint = Endpoint::parse(r"\\.\PIPE\MatPy").unwrap();
        assert_eq!(endpoint.name(), "MatPy");
        assert_eq!(endpoint.to_string(), r"\\.\pipe\MatPy");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "",
            "MatPy",
            r"\\.\pipe\",
            r"\\.\pipes\MatPy",
            r"\\server\pipe\MatPy",
            "/tmp/MatPy.sock",
            r"\\.\pipe\a\b",
            r"\\.\pipe\a/b",
            "\\\\.\\p\u{e9}pe\\x",
        ] {
            let err = Endpoint::parse(raw).unwrap_err();
            assert!(
                matches!(err, IpcError::InvalidEndpoint { .. }),
                "expected InvalidEndpoint for {raw:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_default_endpoint() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.name(), DEFAULT_PIPE_NAME);
        assert_eq!(endpoint.pipe_path(), r"\\.\pipe\MatPy");
        assert_eq!(Endpoint::parse(r"\\.\pipe\MatPy").unwrap(), endpoint);
    }

    #[test]
    fn test_from_str_and_from_name() {
        let parsed: Endpoint = r"\\.\pipe\Trigger".parse().unwrap();
        assert_eq!(parsed, Endpoint::from_name("Trigger").unwrap());
        assert!(Endpoint::from_name("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_path_uses_name() {
        let path = Endpoint::from_name("MatPy").unwrap().socket_path();
        assert!(path.is_absolute(), "socket path should be absolute: {path:?}");
        assert_eq!(path.file_name().unwrap(), "MatPy.pipe");
    }
}
