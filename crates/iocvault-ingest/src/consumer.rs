//! The broker consume loop.
//!
//! Runs until the feed closes, the feed fails, or the process cancellation
//! token fires. Every non-empty batch goes to the [`BatchSink`]; a refused
//! batch is logged and dropped, never retried, because its messages have
//! already been acknowledged.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::assembler::{BatchAssembler, BatchOutcome};
use crate::traits::{BatchSink, MessageFeed};

/// Why the consume loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    FeedClosed,
    Cancelled,
    FeedFailed(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::FeedClosed => write!(f, "feed closed"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::FeedFailed(reason) => write!(f, "feed failed: {}", reason),
        }
    }
}

/// Counters reported when the consume loop exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub batches_dispatched: u64,
    pub batches_rejected: u64,
    pub records_dispatched: u64,
    pub messages_skipped: u64,
    pub stopped_by: StopReason,
}

/// Consume `feed` in batches of `batch_size` until it ends or `cancel` fires.
pub async fn run_ingest<F, S>(
    feed: F,
    batch_size: usize,
    sink: &S,
    cancel: CancellationToken,
) -> IngestSummary
where
    F: MessageFeed,
    S: BatchSink + ?Sized,
{
    let mut assembler = BatchAssembler::new(feed, batch_size);
    let mut batches_dispatched = 0u64;
    let mut batches_rejected = 0u64;
    let mut records_dispatched = 0u64;

    info!(batch_size = assembler.batch_size(), "Consume loop started");

    let mut hand_off = |batch: iocvault_core::Batch| {
        if batch.is_empty() {
            return;
        }
        let len = batch.len() as u64;
        match sink.dispatch(batch) {
            Ok(()) => {
                batches_dispatched += 1;
                records_dispatched += len;
            }
            Err(e) => {
                batches_rejected += 1;
                warn!(records = len, error = %e, "Batch rejected, dropping");
            }
        }
    };

    let stopped_by = loop {
        match assembler.next_batch(&cancel).await {
            BatchOutcome::Full(batch) => hand_off(batch),
            BatchOutcome::Closed(batch) => {
                hand_off(batch);
                break StopReason::FeedClosed;
            }
            BatchOutcome::Interrupted(batch, e) => {
                error!(error = %e, "Broker feed failed, stopping consume loop");
                hand_off(batch);
                break StopReason::FeedFailed(e.to_string());
            }
            BatchOutcome::Cancelled => break StopReason::Cancelled,
        }
    };

    let summary = IngestSummary {
        batches_dispatched,
        batches_rejected,
        records_dispatched,
        messages_skipped: assembler.skipped(),
        stopped_by,
    };
    info!(
        batches = summary.batches_dispatched,
        rejected = summary.batches_rejected,
        records = summary.records_dispatched,
        skipped = summary.messages_skipped,
        reason = %summary.stopped_by,
        "Consume loop stopped"
    );
    summary
}
