//! Error Types for iocvault-core
//!
//! ## Error Categories
//!
//! ### Codec Errors
//! - `Decode`: broker payload is not a valid record document
//! - `Encode`: record could not be serialized
//!
//! ### Wire Conversion Errors
//! - `InvalidTimestamp`: a timestamp is outside the representable range
//! - `MissingField`: a required message field was not set
//!
//! ### Stream Errors
//! - `StreamAborted`: an inbound record stream ended with a transport failure
//!   instead of a clean close. Consumers of a record channel must roll back
//!   whatever they staged when they see this.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Invalid timestamp: {seconds}s {nanos}ns")]
    InvalidTimestamp { seconds: i64, nanos: i32 },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Stream aborted: {0}")]
    StreamAborted(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_timestamp_display() {
        let err = Error::InvalidTimestamp {
            seconds: i64::MAX,
            nanos: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("Invalid timestamp"));
        assert!(msg.contains("7ns"));
    }

    #[test]
    fn test_stream_aborted_display() {
        let err = Error::StreamAborted("connection reset".to_string());
        assert_eq!(err.to_string(), "Stream aborted: connection reset");
    }

    #[test]
    fn test_decode_error_keeps_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::Decode(json_err);
        assert!(err.to_string().starts_with("Decode error"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
