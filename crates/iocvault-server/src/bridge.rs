//! Streaming bridge between network streams and worker-pool channels.
//!
//! ## Inbound (client → storage)
//!
//! [`spawn_inbound`] starts a reader task that converts each wire message to
//! an [`IndicatorRecord`] and pushes it onto a bounded channel of
//! [`INBOUND_BUFFER`] items:
//!
//! | Event | Channel |
//! |-------|---------|
//! | message converts | `Ok(record)` |
//! | end of stream | closed |
//! | transport error | one `Err(StreamAborted)`, then closed |
//! | conversion error | one `Err(..)`, then closed |
//! | cancellation | closed, the in-flight push is abandoned |
//!
//! The receiving side is a `stream_write` task, which only commits when the
//! channel closes without an `Err` item.
//!
//! ## Outbound (storage → client)
//!
//! [`outbound_stream`] drains a worker's output channel as a [`Stream`]. It
//! ends when the channel closes, or immediately when the token fires, even
//! if records are still buffered. Dropping the stream cancels the token, so
//! a client disconnect stops the storage read behind it.

use futures::{Stream, StreamExt};
use iocvault_core::{Error, IndicatorRecord};
use iocvault_storage::InboundRecord;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, warn};

pub const INBOUND_BUFFER: usize = 100;

/// Read `messages` on a background task, converting each into a record.
pub fn spawn_inbound<S, M>(messages: S, cancel: CancellationToken) -> mpsc::Receiver<InboundRecord>
where
    S: Stream<Item = Result<M, Status>> + Send + Unpin + 'static,
    M: TryInto<IndicatorRecord, Error = Error> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

    tokio::spawn(async move {
        let mut messages = messages;
        let mut received = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(received, "Inbound stream cancelled");
                    break;
                }
                next = messages.next() => next,
            };

            let item = match next {
                None => {
                    debug!(received, "Inbound stream finished");
                    break;
                }
                Some(Ok(message)) => message.try_into(),
                Some(Err(status)) => Err(Error::StreamAborted(status.message().to_string())),
            };

            let last = match &item {
                Ok(_) => false,
                Err(e) => {
                    warn!(received, error = %e, "Inbound stream failed");
                    true
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        // writer already gave up
                        break;
                    }
                }
            }
            if last {
                break;
            }
            received += 1;
        }
    });

    rx
}

/// Expose `rx` as a stream tied to `cancel`.
///
/// Once it has ended the stream keeps yielding `None`.
pub fn outbound_stream<T>(rx: mpsc::Receiver<T>, cancel: CancellationToken) -> impl Stream<Item = T> + Send
where
    T: Send + 'static,
{
    let guard = cancel.clone().drop_guard();

    futures::stream::unfold((rx, cancel, guard), |(mut rx, cancel, guard)| async move {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = rx.recv() => item,
        };
        item.map(|item| (item, (rx, cancel, guard)))
    })
    .fuse()
}
