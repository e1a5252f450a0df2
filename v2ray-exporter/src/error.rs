use thiserror::Error;

use crate::config::ConfigError;

/// Common error type for the exporter.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to connect to V2Ray API at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the exporter's Error.
pub type Result<T> = std::result::Result<T, Error>;
