//! Log output setup for the binary
//!
//! Logs go to stderr so stdout carries only query results. The default level
//! comes from the command line and can be refined through `RUST_LOG`.

use clap::ValueEnum;
use std::io;
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Errors that can occur while installing the subscriber
#[derive(Debug, Error)]
pub enum LogError {
    /// The level string is not one of trace, debug, info, warn, error
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    /// A global subscriber was already installed
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Parses a level name, case-insensitively
pub fn parse_level(level: &str) -> Result<Level, LogError> {
    Level::from_str(level).map_err(|_| LogError::InvalidLevel(level.to_string()))
}

/// Installs the global tracing subscriber
pub fn init(level: &str, format: LogFormat) -> Result<(), LogError> {
    let filter = EnvFilter::builder()
        .with_default_directive(parse_level(level)?.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| LogError::Install(e.to_string()))
}
