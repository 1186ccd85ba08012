//! Core types for iocvault.
//!
//! Everything the ingestion pipeline, the storage gateway and the RPC layer
//! agree on lives here: the [`IndicatorRecord`] model with its lowercase
//! normalization, the [`LoadRequest`] page query, the [`RecordCodec`] used on
//! broker payloads, the count map shapes returned by aggregate queries, and
//! the flat connect-retry policy shared by the broker and storage clients.

pub mod codec;
pub mod error;
pub mod record;
pub mod retry;

pub use codec::RecordCodec;
pub use error::{Error, Result};
pub use retry::{retry_flat, ConnectRetryPolicy};
pub use record::{Batch, IndicatorRecord, LoadRequest, SourceCounts, TypeCounts, TypesBySource};
