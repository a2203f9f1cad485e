//! Pipe settings resolved from defaults and environment variables.
//!
//! | Variable                   | Meaning                              | Default          |
//! |----------------------------|--------------------------------------|------------------|
//! | `MATPY_PIPE`               | endpoint, `\\.\pipe\<name>`          | `\\.\pipe\MatPy` |
//! | `MATPY_CONNECT_TIMEOUT_MS` | connect timeout in milliseconds      | `1000`           |
//! | `MATPY_READ_TIMEOUT_MS`    | reply timeout in milliseconds        | none             |
//! | `MATPY_PIPE_DIR`           | socket directory (Unix only)         | runtime dir      |
//!
//! Command-line flags take precedence over these.

use std::time::Duration;

use crate::ipc::{Endpoint, DEFAULT_CONNECT_TIMEOUT};

/// Environment variable overriding the endpoint.
pub const PIPE_ENV: &str = "MATPY_PIPE";

/// Environment variable overriding the connect timeout (ms).
pub const CONNECT_TIMEOUT_ENV: &str = "MATPY_CONNECT_TIMEOUT_MS";

/// Environment variable setting a reply timeout (ms). `0` disables it.
pub const READ_TIMEOUT_ENV: &str = "MATPY_READ_TIMEOUT_MS";

/// Environment variable overriding the directory of Unix domain sockets.
pub const PIPE_DIR_ENV: &str = "MATPY_PIPE_DIR";

/// Client and server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
    /// `None` waits for the reply indefinitely.
    pub read_timeout: Option<Duration>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
        }
    }
}

impl PipeConfig {
    /// Defaults overlaid with the `MATPY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// Unusable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(PIPE_ENV) {
            match Endpoint::parse(&raw) {
                Ok(endpoint) => config.endpoint = endpoint,
                Err(e) => tracing::warn!("Ignoring {}: {}", PIPE_ENV, e),
            }
        }

        if let Some(ms) = lookup_millis(&lookup, CONNECT_TIMEOUT_ENV) {
            config.connect_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = lookup_millis(&lookup, READ_TIMEOUT_ENV) {
            config.read_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config
    }
}

fn lookup_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipeConfig::from_lookup(|_| None);
        assert_eq!(config, PipeConfig::default());
        assert_eq!(config.endpoint.name(), "MatPy");
        assert_eq!(config.connect_timeout, Duration::from_millis(1000));
        assert_eq!(config.read_timeout, None);
    }

    #[test]
    fn test_overrides() {
        let config = PipeConfig::from_lookup(lookup_from(&[
            (PIPE_ENV, r"\\.\pipe\Stage"),
            (CONNECT_TIMEOUT_ENV, "250"),
            (READ_TIMEOUT_ENV, " 3000 "),
        ]));
        assert_eq!(config.endpoint.name(), "Stage");
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_zero_read_timeout_disables_it() {
        let config = PipeConfig::from_lookup(lookup_from(&[(READ_TIMEOUT_ENV, "0")]));
        assert_eq!(config.read_timeout, None);
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = PipeConfig::from_lookup(lookup_from(&[
            (PIPE_ENV, "Stage"),
            (CONNECT_TIMEOUT_ENV, "soon"),
            (READ_TIMEOUT_ENV, "-5"),
        ]));
        assert_eq!(config, PipeConfig::default());
    }
}
