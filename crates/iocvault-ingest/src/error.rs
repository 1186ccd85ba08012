//! Error types for broker ingestion.

use thiserror::Error;

/// Errors that can occur while connecting to or consuming from the broker.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The broker could not be reached. Fatal at startup.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The feed failed after it was established.
    #[error("Source error: {0}")]
    SourceError(String),

    /// Connecting was abandoned because shutdown started.
    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
