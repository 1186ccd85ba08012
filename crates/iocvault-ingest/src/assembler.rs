//! Batch Assembly
//!
//! Turns a [`MessageFeed`] of raw payloads into fixed-size batches of
//! decoded records.
//!
//! ## Algorithm
//!
//! Each call to [`BatchAssembler::next_batch`] starts an empty batch and
//! reads one message at a time:
//!
//! - decodes → appended
//! - does not decode → logged, counted, skipped (the batch continues)
//! - batch reaches `batch_size` → [`BatchOutcome::Full`]
//! - feed closed → [`BatchOutcome::Closed`] with whatever was collected,
//!   possibly nothing
//! - feed failed → [`BatchOutcome::Interrupted`] with the partial batch
//! - cancellation → [`BatchOutcome::Cancelled`]; the partial batch is dropped
//!
//! Dropped records were already acknowledged by the broker and are not
//! redelivered.
//!
//! For `M` decodable messages and batch size `N` the assembler yields
//! `ceil(M / N)` non-empty batches before the feed closes, the last one
//! possibly short.

use iocvault_core::{Batch, RecordCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::traits::MessageFeed;

/// Result of one [`BatchAssembler::next_batch`] call.
#[derive(Debug)]
pub enum BatchOutcome {
    /// `batch_size` records collected; more may follow.
    Full(Batch),
    /// The feed closed. The batch may be empty.
    Closed(Batch),
    /// The feed failed after `Batch` was partially collected.
    Interrupted(Batch, IngestError),
    /// Cancellation fired; partial work was discarded.
    Cancelled,
}

pub struct BatchAssembler<F> {
    feed: F,
    batch_size: usize,
    skipped: u64,
}

impl<F: MessageFeed> BatchAssembler<F> {
    /// A zero `batch_size` is treated as 1.
    pub fn new(feed: F, batch_size: usize) -> Self {
        Self {
            feed,
            batch_size: batch_size.max(1),
            skipped: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Messages dropped so far because they did not decode.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub async fn next_batch(&mut self, cancel: &CancellationToken) -> BatchOutcome {
        let mut batch = Batch::with_capacity(self.batch_size);

        while batch.len() < self.batch_size {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(discarded = batch.len(), "Batch assembly cancelled");
                    return BatchOutcome::Cancelled;
                }
                message = self.feed.recv() => message,
            };

            match message {
                None => return BatchOutcome::Closed(batch),
                Some(Err(e)) => return BatchOutcome::Interrupted(batch, e),
                Some(Ok(payload)) => match RecordCodec::decode(&payload) {
                    Ok(record) => batch.push(record),
                    Err(e) => {
                        self.skipped += 1;
                        warn!(
                            error = %e,
                            payload_bytes = payload.len(),
                            skipped_total = self.skipped,
                            "Skipping undecodable broker message"
                        );
                    }
                },
            }
        }

        BatchOutcome::Full(batch)
    }

    pub fn into_inner(self) -> F {
        self.feed
    }
}
