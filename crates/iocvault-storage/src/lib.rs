//! Storage gateway for indicator records.
//!
//! The dispatch layer never talks to a database directly. Every task it runs
//! goes through the [`IocStore`] trait, which has two implementations:
//!
//! - [`MemoryIocStore`]: process-local, used by tests and `STORAGE_BACKEND=memory`
//! - [`PostgresIocStore`]: sqlx-backed, behind the `postgres` feature
//!
//! ## Contract
//!
//! | Operation | Guarantee |
//! |-----------|-----------|
//! | `write_batch` | all records or none (one transaction) |
//! | `read_page` | `LIMIT/OFFSET` page, optional substring filter |
//! | `stream_write` | commits only after the input channel closes cleanly |
//! | `stream_read` | records delivered through a bounded channel until done or cancelled |
//! | `count_*` | aggregate reads over normalized fields |
//!
//! Records are normalized (lowercased) at this boundary, so every
//! implementation stores and counts the lowercase form. Name arguments to
//! the specific-count queries are lowercased the same way.
//!
//! Nothing in this crate retries a failed call except the initial
//! connection; errors go back to the task that issued the call.

pub mod config;
pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use config::PostgresConfig;
pub use error::{Result, StorageError};
pub use memory::MemoryIocStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresIocStore;

use async_trait::async_trait;
use iocvault_core::{Batch, IndicatorRecord, LoadRequest, SourceCounts, TypeCounts, TypesBySource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the channel returned by [`IocStore::stream_read`].
pub const STREAM_BUFFER: usize = 100;

/// Items fed into [`IocStore::stream_write`].
///
/// An `Err` item means the producer hit a transport failure; the write must
/// be rolled back.
pub type InboundRecord = iocvault_core::Result<IndicatorRecord>;

/// Items produced by [`IocStore::stream_read`].
pub type OutboundRecord = Result<IndicatorRecord>;

/// Persistence capabilities used by worker-pool tasks.
#[async_trait]
pub trait IocStore: Send + Sync {
    /// Persist a batch atomically, in order.
    async fn write_batch(&self, records: Batch) -> Result<()>;

    /// Read one page of records.
    async fn read_page(&self, request: &LoadRequest) -> Result<Vec<IndicatorRecord>>;

    /// Persist every record received on `records` in a single transaction.
    ///
    /// Commits when the channel closes cleanly and returns the number of
    /// committed records. Rolls back and fails when `cancel` fires, when an
    /// `Err` item arrives, or when any insert fails.
    async fn stream_write(
        &self,
        records: mpsc::Receiver<InboundRecord>,
        cancel: CancellationToken,
    ) -> Result<u64>;

    /// Start streaming the records selected by `request`.
    ///
    /// The returned channel holds at most [`STREAM_BUFFER`] records. The
    /// producer stops reading as soon as `cancel` fires or the receiver is
    /// dropped. A read failure is delivered as a final `Err` item.
    async fn stream_read(
        &self,
        request: LoadRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<OutboundRecord>>;

    /// Total number of stored records.
    async fn count(&self) -> Result<i64>;

    async fn count_by_type(&self) -> Result<TypeCounts>;

    async fn count_specific_type(&self, ioc_type: &str) -> Result<i64>;

    async fn count_by_source(&self) -> Result<SourceCounts>;

    async fn count_specific_source(&self, source: &str) -> Result<i64>;

    async fn count_types_by_source(&self) -> Result<TypesBySource>;

    /// Type breakdown for one source.
    async fn count_by_source_and_type(&self, source: &str) -> Result<TypeCounts>;

    /// Source breakdown for one type.
    async fn count_by_type_and_source(&self, ioc_type: &str) -> Result<SourceCounts>;
}
