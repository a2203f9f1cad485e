//! matpy - send or serve newline-delimited JSON over a named pipe.
//!
//! `matpy send '{"dmd":"start"}'` plays the MATLAB side of the exchange;
//! `matpy serve` stands in for the rig back end while testing scripts.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matpy_pipe::config::PipeConfig;
use matpy_pipe::dispatch::EchoHandler;
use matpy_pipe::ipc::{Endpoint, PipeClient, PipeServer};
use matpy_pipe::task::{CancellableTask, TaskCommands};

#[derive(Debug, Parser)]
#[command(name = "matpy", version, about = "JSON messaging over named pipes")]
struct Cli {
    /// Connect timeout in milliseconds
    #[arg(long, global = true)]
    connect_timeout_ms: Option<u64>,

    /// Reply timeout in milliseconds (0 waits forever)
    #[arg(long, global = true)]
    read_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one JSON message and print the reply
    Send {
        /// Message as JSON text, e.g. '{"dmd":"start"}'
        message: String,

        /// Endpoint, e.g. \\.\pipe\MatPy
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Answer requests until interrupted
    Serve {
        /// Endpoint, e.g. \\.\pipe\MatPy
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(long, value_enum, default_value_t = ServeMode::Echo)]
        mode: ServeMode,

        /// Request field carrying start/stop in task mode
        #[arg(long, default_value = "cmd")]
        command_key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServeMode {
    /// Reply with the request
    Echo,
    /// Reply {"status":"ok"}
    Status,
    /// Start/stop a heartbeat task
    Task,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only replies
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "matpy=info,matpy_pipe=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli, PipeConfig::from_env());

    match cli.command {
        Command::Send { message, endpoint } => send(&config, &message, endpoint.as_deref()).await,
        Command::Serve {
            endpoint,
            mode,
            command_key,
        } => serve(&config, endpoint.as_deref(), mode, command_key).await,
    }
}

/// `config` (usually from the environment) with command-line overrides applied.
fn resolve_config(cli: &Cli, mut config: PipeConfig) -> PipeConfig {
    if let Some(ms) = cli.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.read_timeout_ms {
        config.read_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }
    config
}

async fn send(config: &PipeConfig, message: &str, endpoint: Option<&str>) -> Result<()> {
    let request: Value = serde_json::from_str(message).context("Message is not valid JSON")?;
    let client = PipeClient::from_config(config);

    let reply = match endpoint {
        Some(endpoint) => client.send(&request, endpoint).await?,
        None => client.send_default(&request).await?,
    };

    println!("{}", reply);
    Ok(())
}

async fn serve(
    config: &PipeConfig,
    endpoint: Option<&str>,
    mode: ServeMode,
    command_key: String,
) -> Result<()> {
    let endpoint = match endpoint {
        Some(raw) => Endpoint::parse(raw)?,
        None => config.endpoint.clone(),
    };

    let label = endpoint.to_string();
    let server = match mode {
        ServeMode::Echo => PipeServer::new(endpoint, EchoHandler),
        ServeMode::Status => PipeServer::new(endpoint, |_: &Value| -> Result<Option<Value>> { Ok(None) }),
        ServeMode::Task => PipeServer::new(endpoint, heartbeat_task(command_key)),
    };

    let handle = server
        .start()
        .with_context(|| format!("Failed to listen on {}", label))?;
    tracing::info!("matpy v{} serving {:?} on {}", env!("CARGO_PKG_VERSION"), mode, handle.endpoint());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    handle.stop().await;
    Ok(())
}

/// A task that logs a heartbeat every half second until stopped.
fn heartbeat_task(command_key: String) -> CancellableTask {
    CancellableTask::new(|stop| {
        let mut beats: u64 = 0;
        while !stop.wait_timeout(Duration::from_millis(500)) {
            beats += 1;
            tracing::info!("heartbeat {}", beats);
        }
        Ok(())
    })
    .with_commands(TaskCommands {
        key: command_key,
        ..TaskCommands::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matpy_pipe::config::{CONNECT_TIMEOUT_ENV, READ_TIMEOUT_ENV};
    use pretty_assertions::assert_eq;

    fn env_config() -> PipeConfig {
        PipeConfig::from_lookup(|key| match key {
            CONNECT_TIMEOUT_ENV => Some("250".to_string()),
            READ_TIMEOUT_ENV => Some("4000".to_string()),
            _ => None,
        })
    }

    #[test]
    fn test_environment_applies_without_flags() {
        let cli = Cli::try_parse_from(["matpy", "send", "{}"]).unwrap();
        let config = resolve_config(&cli, env_config());

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.read_timeout, Some(Duration::from_millis(4000)));
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = Cli::try_parse_from([
            "matpy",
            "--connect-timeout-ms",
            "75",
            "send",
            "{}",
            "--read-timeout-ms",
            "300",
        ])
        .unwrap();
        let config = resolve_config(&cli, env_config());

        assert_eq!(config.connect_timeout, Duration::from_millis(75));
        assert_eq!(config.read_timeout, Some(Duration::from_millis(300)));
    }

    #[test]
    fn test_zero_read_timeout_waits_forever() {
        let cli = Cli::try_parse_from(["matpy", "--read-timeout-ms", "0", "send", "{}"]).unwrap();
        let config = resolve_config(&cli, env_config());

        assert_eq!(config.read_timeout, None);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["matpy", "serve"]).unwrap();
        let config = resolve_config(&cli, PipeConfig::default());
        assert_eq!(config.connect_timeout, Duration::from_millis(1000));

        match cli.command {
            Command::Serve {
                endpoint,
                mode,
                command_key,
            } => {
                assert_eq!(endpoint, None);
                assert_eq!(mode, ServeMode::Echo);
                assert_eq!(command_key, "cmd");
            }
            other => panic!("Expected serve, got {:?}", other),
        }
    }
}
