//! Error types shared across the jSupla crates.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame or payload.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Frame exceeded the accepted length before its newline arrived.
    #[error("Frame longer than {max} bytes")]
    FrameTooLong { max: usize },

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Outbound channel failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Errors raised when writing to a device connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),
}
