//! Error types for the dispatch service.
//!
//! ## Categories
//!
//! - [`PoolError`]: admission failures from the worker pool. `QueueFull` is
//!   the only backpressure signal in the system.
//! - [`ServiceError`]: what a dispatched operation reports back to its caller.
//! - [`ConfigError`]: bad environment configuration at startup.
//!
//! `ServiceError` maps onto gRPC status codes:
//!
//! | ServiceError | Code |
//! |--------------|------|
//! | `Pool(QueueFull)` | `RESOURCE_EXHAUSTED` |
//! | `Pool(ShutDown)` | `UNAVAILABLE` |
//! | `Cancelled` | `CANCELLED` |
//! | `InvalidInput`, `Storage(InvalidRecord)` | `INVALID_ARGUMENT` |
//! | `Storage` | `INTERNAL` |
//! | `TaskLost` | `INTERNAL` |

use thiserror::Error;
use tonic::Status;

use iocvault_storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("task queue full")]
    QueueFull,

    #[error("worker pool is shut down")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(#[from] iocvault_core::Error),

    #[error("storage error: {0}")]
    Storage(StorageError),

    /// The task was dropped without reporting a result (it panicked).
    #[error("task ended without a result")]
    TaskLost,
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        if e.is_cancelled() {
            ServiceError::Cancelled
        } else {
            ServiceError::Storage(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        match &err {
            ServiceError::Pool(PoolError::QueueFull) => Status::resource_exhausted(err.to_string()),
            ServiceError::Pool(PoolError::ShutDown) => Status::unavailable(err.to_string()),
            ServiceError::Cancelled => Status::cancelled(err.to_string()),
            ServiceError::InvalidInput(_) | ServiceError::Storage(StorageError::InvalidRecord(_)) => {
                Status::invalid_argument(err.to_string())
            }
            ServiceError::Storage(_) | ServiceError::TaskLost => Status::internal(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid value for {name}: {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_queue_full_is_resource_exhausted() {
        let status: Status = ServiceError::from(PoolError::QueueFull).into();
        assert_eq!(status.code(), Code::ResourceExhausted);
        assert!(status.message().contains("queue full"));
    }

    #[test]
    fn test_shut_down_is_unavailable() {
        let status: Status = ServiceError::from(PoolError::ShutDown).into();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[test]
    fn test_cancelled_is_cancelled() {
        let status: Status = ServiceError::Cancelled.into();
        assert_eq!(status.code(), Code::Cancelled);
    }

    #[test]
    fn test_storage_cancel_maps_to_cancelled() {
        let err = ServiceError::from(StorageError::Cancelled);
        assert!(matches!(err, ServiceError::Cancelled));
    }

    #[test]
    fn test_storage_failure_is_internal() {
        let err = ServiceError::from(StorageError::Connection("pool closed".into()));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("pool closed"));
    }

    #[test]
    fn test_bad_timestamp_is_invalid_argument() {
        let err = ServiceError::from(iocvault_core::Error::InvalidTimestamp {
            seconds: 0,
            nanos: -1,
        });
        let status: Status = err.into();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_bad_streamed_record_is_invalid_argument() {
        let err = ServiceError::from(StorageError::InvalidRecord("missing field: ioc".into()));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError {
            name: "BATCH_SIZE",
            reason: "invalid digit found in string".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for BATCH_SIZE: invalid digit found in string"
        );
    }
}
