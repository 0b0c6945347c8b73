//! Global `tracing` subscriber setup.

use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

/// Failure to install the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive did not parse.
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    /// A global subscriber is already installed.
    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Installs a formatted subscriber writing to stderr, filtered by `level`
/// (any `EnvFilter` directive such as `info` or `cradle=debug`).
pub fn init_logging(level: &str) -> Result<(), LoggingError> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidLevel(e.to_string()))?,
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
