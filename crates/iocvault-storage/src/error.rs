//! Storage Error Types
//!
//! ## Error Categories
//!
//! ### Connection Errors
//! - `Connection`: the database could not be reached within the retry budget
//! - `Migration`: the schema migration failed at startup
//!
//! ### Query Errors
//! - `Database`: a query or transaction failed
//! - `Serialization`: a stored JSON column could not be encoded or decoded
//!
//! ### Stream Errors
//! - `Cancelled`: a streaming write or read was cancelled; staged work was discarded
//! - `StreamAborted`: the inbound record stream ended with a transport failure
//! - `InvalidRecord`: the inbound record stream carried a record that could not be converted
//!
//! ## Usage
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, StorageError>`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl StorageError {
    /// Cancellation is not a storage failure and is logged at a lower level.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled)
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        StorageError::Migration(e.to_string())
    }
}

impl From<iocvault_core::Error> for StorageError {
    fn from(e: iocvault_core::Error) -> Self {
        match e {
            iocvault_core::Error::StreamAborted(reason) => StorageError::StreamAborted(reason),
            other => StorageError::InvalidRecord(other.to_string()),
        }
    }
}
