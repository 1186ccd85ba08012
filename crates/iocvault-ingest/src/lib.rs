//! Broker ingestion for iocvault.
//!
//! This crate owns the write path from the message broker up to the point
//! where a batch is handed off for persistence:
//!
//! ```text
//! Broker ──open──▶ MessageFeed ──▶ BatchAssembler ──▶ BatchSink (worker pool)
//!   ▲                                   │
//!   └── BrokerConnector (flat retry)    └── decode failures logged and skipped
//! ```
//!
//! - [`Broker`] / [`MessageFeed`]: transport seam. [`ChannelBroker`] is the
//!   in-process transport; `KafkaBroker` (feature `kafka`) is the production one.
//! - [`BrokerConnector`]: startup connection with a fixed retry budget.
//! - [`BatchAssembler`]: fixed-size batches, cancellation aware.
//! - [`run_ingest`]: the consume loop feeding a [`BatchSink`].
//!
//! Messages are acknowledged by the broker on receipt. A batch that is
//! rejected or fails to persist is not redelivered.

pub mod assembler;
pub mod channel;
pub mod config;
pub mod connector;
pub mod consumer;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod traits;

pub use assembler::{BatchAssembler, BatchOutcome};
pub use channel::{ChannelBroker, ChannelFeed};
pub use config::BrokerConfig;
pub use connector::BrokerConnector;
pub use consumer::{run_ingest, IngestSummary, StopReason};
pub use error::{IngestError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBroker, KafkaFeed};
pub use traits::{BatchSink, Broker, MessageFeed};
