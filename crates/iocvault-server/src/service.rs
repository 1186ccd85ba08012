//! Dispatch service: every storage operation as a worker-pool task.
//!
//! ## Unary operations
//!
//! Store, load and every count follow the same path:
//!
//! 1. build a task that calls the store and sends its result on a
//!    [`oneshot`] channel
//! 2. [`WorkerPool::submit`] it (a full queue fails right here)
//! 3. wait on the channel, raced against the caller's cancellation token
//!
//! If the caller cancels first it gets [`ServiceError::Cancelled`] straight
//! away. The task keeps running in the background and its result is dropped.
//!
//! ## Streams
//!
//! - `stream_store` hands an inbound record channel to one task that calls
//!   `stream_write`, and waits for the committed count like any unary call.
//! - `stream_load` starts a task that republishes `stream_read` results on a
//!   bounded output channel and returns that channel at once.
//!
//! ## Broker batches
//!
//! [`IocService`] is the consume loop's [`BatchSink`]. Batches are written
//! fire-and-forget: failures are logged and nobody waits on them.

use std::future::Future;
use std::sync::Arc;

use iocvault_core::{Batch, IndicatorRecord, LoadRequest, SourceCounts, TypeCounts, TypesBySource};
use iocvault_ingest::BatchSink;
use iocvault_storage::{InboundRecord, IocStore, OutboundRecord, StorageError, STREAM_BUFFER};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{PoolError, Result, ServiceError};
use crate::pool::WorkerPool;

#[derive(Clone)]
pub struct IocService {
    pool: Arc<WorkerPool>,
    store: Arc<dyn IocStore>,
}

impl IocService {
    pub fn new(pool: Arc<WorkerPool>, store: Arc<dyn IocStore>) -> Self {
        Self { pool, store }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Submit `op` and wait for its result or for `cancel`.
    async fn run_unary<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn IocStore>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, StorageError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);

        self.pool.submit(async move {
            let result = op(store).await;
            match &result {
                Err(e) if e.is_cancelled() => debug!(operation, "Storage operation cancelled"),
                Err(e) => error!(operation, error = %e, "Storage operation failed"),
                Ok(_) => {}
            }
            // The caller may have given up already.
            let _ = tx.send(result);
        })?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(operation, "Caller cancelled, discarding result");
                Err(ServiceError::Cancelled)
            }
            result = rx => match result {
                Ok(result) => result.map_err(ServiceError::from),
                Err(_) => Err(ServiceError::TaskLost),
            },
        }
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub async fn store(&self, records: Batch, cancel: &CancellationToken) -> Result<()> {
        self.run_unary("store", cancel, move |store| async move {
            store.write_batch(records).await
        })
        .await
    }

    pub async fn load(
        &self,
        request: LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<IndicatorRecord>> {
        self.run_unary("load", cancel, move |store| async move {
            store.read_page(&request).await
        })
        .await
    }

    /// Persist everything arriving on `records` in one transaction.
    ///
    /// Returns the number of committed records.
    pub async fn stream_store(
        &self,
        records: mpsc::Receiver<InboundRecord>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let task_cancel = cancel.clone();
        self.run_unary("stream_store", cancel, move |store| async move {
            store.stream_write(records, task_cancel).await
        })
        .await
    }

    /// Start streaming the records selected by `request`.
    ///
    /// The returned channel holds at most [`STREAM_BUFFER`] records. The
    /// producing task stops as soon as `cancel` fires or the receiver is
    /// dropped, and passes the same token on to the store.
    pub fn stream_load(
        &self,
        request: LoadRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<OutboundRecord>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let store = Arc::clone(&self.store);

        self.pool.submit(async move {
            let mut source = match store.stream_read(request, cancel.clone()).await {
                Ok(source) => source,
                Err(e) => {
                    error!(error = %e, "Failed to start stream read");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let mut forwarded = 0u64;
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    item = source.recv() => item,
                };
                let Some(item) = item else { break };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                forwarded += 1;
            }
            debug!(forwarded, cancelled = cancel.is_cancelled(), "Stream load task finished");
        })?;

        Ok(rx)
    }

    // ========================================================================
    // Counts
    // ========================================================================

    pub async fn count(&self, cancel: &CancellationToken) -> Result<i64> {
        self.run_unary("count", cancel, |store| async move { store.count().await })
            .await
    }

    pub async fn count_by_type(&self, cancel: &CancellationToken) -> Result<TypeCounts> {
        self.run_unary("count_by_type", cancel, |store| async move {
            store.count_by_type().await
        })
        .await
    }

    pub async fn count_specific_type(
        &self,
        ioc_type: String,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        self.run_unary("count_specific_type", cancel, move |store| async move {
            store.count_specific_type(&ioc_type).await
        })
        .await
    }

    pub async fn count_by_source(&self, cancel: &CancellationToken) -> Result<SourceCounts> {
        self.run_unary("count_by_source", cancel, |store| async move {
            store.count_by_source().await
        })
        .await
    }

    pub async fn count_specific_source(
        &self,
        source: String,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        self.run_unary("count_specific_source", cancel, move |store| async move {
            store.count_specific_source(&source).await
        })
        .await
    }

    pub async fn count_types_by_source(&self, cancel: &CancellationToken) -> Result<TypesBySource> {
        self.run_unary("count_types_by_source", cancel, |store| async move {
            store.count_types_by_source().await
        })
        .await
    }

    pub async fn count_by_source_and_type(
        &self,
        source: String,
        cancel: &CancellationToken,
    ) -> Result<TypeCounts> {
        self.run_unary("count_by_source_and_type", cancel, move |store| async move {
            store.count_by_source_and_type(&source).await
        })
        .await
    }

    pub async fn count_by_type_and_source(
        &self,
        ioc_type: String,
        cancel: &CancellationToken,
    ) -> Result<SourceCounts> {
        self.run_unary("count_by_type_and_source", cancel, move |store| async move {
            store.count_by_type_and_source(&ioc_type).await
        })
        .await
    }
}

impl BatchSink for IocService {
    type Error = PoolError;

    fn dispatch(&self, batch: Batch) -> std::result::Result<(), PoolError> {
        let store = Arc::clone(&self.store);
        let records = batch.len();

        let accepted = self.pool.submit(async move {
            match store.write_batch(batch).await {
                Ok(()) => debug!(records, "Batch persisted"),
                Err(e) => error!(records, error = %e, "Failed to persist batch, records lost"),
            }
        });
        if let Err(e) = &accepted {
            warn!(records, error = %e, queued = self.pool.queued_tasks(), "Batch not accepted");
        }
        accepted
    }
}
