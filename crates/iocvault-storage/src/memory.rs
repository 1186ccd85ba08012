//! In-memory storage backend.
//!
//! Keeps records in insertion order behind a `tokio::sync::RwLock`. Batch
//! writes take the write lock once, so a batch is visible all at once or
//! not at all. Stream writes stage records locally and only publish them
//! when the input channel closes cleanly.

use std::sync::Arc;

use async_trait::async_trait;
use iocvault_core::{Batch, IndicatorRecord, LoadRequest, SourceCounts, TypeCounts, TypesBySource};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::{InboundRecord, IocStore, OutboundRecord, STREAM_BUFFER};

#[derive(Debug, Clone, Default)]
pub struct MemoryIocStore {
    records: Arc<RwLock<Vec<IndicatorRecord>>>,
}

impl MemoryIocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, without going through the trait.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn select(records: &[IndicatorRecord], request: &LoadRequest) -> Vec<IndicatorRecord> {
        let offset = usize::try_from(request.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(request.limit).unwrap_or(usize::MAX);
        records
            .iter()
            .filter(|r| request.filter().map_or(true, |f| r.matches_filter(f)))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn count_where<F>(&self, predicate: F) -> i64
    where
        F: Fn(&IndicatorRecord) -> bool,
    {
        self.records.read().await.iter().filter(|r| predicate(r)).count() as i64
    }

    async fn group_by<K, F>(&self, predicate: F, key: K) -> std::collections::HashMap<String, i64>
    where
        F: Fn(&IndicatorRecord) -> bool,
        K: Fn(&IndicatorRecord) -> &str,
    {
        let records = self.records.read().await;
        let mut counts = std::collections::HashMap::new();
        for record in records.iter().filter(|r| predicate(r)) {
            *counts.entry(key(record).to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl IocStore for MemoryIocStore {
    async fn write_batch(&self, records: Batch) -> Result<()> {
        let normalized: Vec<_> = records.into_iter().map(IndicatorRecord::normalized).collect();
        let mut stored = self.records.write().await;
        stored.extend(normalized);
        Ok(())
    }

    async fn read_page(&self, request: &LoadRequest) -> Result<Vec<IndicatorRecord>> {
        let stored = self.records.read().await;
        Ok(Self::select(&stored, request))
    }

    async fn stream_write(
        &self,
        mut records: mpsc::Receiver<InboundRecord>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let mut staged = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(staged = staged.len(), "Stream write cancelled, discarding staged records");
                    return Err(StorageError::Cancelled);
                }
                item = records.recv() => match item {
                    Some(Ok(record)) => staged.push(record.normalized()),
                    Some(Err(e)) => {
                        debug!(staged = staged.len(), error = %e, "Stream write aborted, discarding staged records");
                        return Err(e.into());
                    }
                    None => break,
                }
            }
        }

        let committed = staged.len() as u64;
        self.records.write().await.extend(staged);
        Ok(committed)
    }

    async fn stream_read(
        &self,
        request: LoadRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<OutboundRecord>> {
        let page = {
            let stored = self.records.read().await;
            Self::select(&stored, &request)
        };
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        // The page is taken before the call returns; later writes are not seen.
        tokio::spawn(async move {
            let total = page.len();
            let mut sent = 0usize;
            for record in page {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    res = tx.send(Ok(record)) => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
                sent += 1;
            }
            debug!(sent, total, "Memory stream read finished");
        });

        Ok(rx)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.records.read().await.len() as i64)
    }

    async fn count_by_type(&self) -> Result<TypeCounts> {
        Ok(self.group_by(|_| true, |r| r.ioc_type.as_str()).await)
    }

    async fn count_specific_type(&self, ioc_type: &str) -> Result<i64> {
        let wanted = ioc_type.to_lowercase();
        Ok(self.count_where(|r| r.ioc_type == wanted).await)
    }

    async fn count_by_source(&self) -> Result<SourceCounts> {
        Ok(self.group_by(|_| true, |r| r.source.as_str()).await)
    }

    async fn count_specific_source(&self, source: &str) -> Result<i64> {
        let wanted = source.to_lowercase();
        Ok(self.count_where(|r| r.source == wanted).await)
    }

    async fn count_types_by_source(&self) -> Result<TypesBySource> {
        let records = self.records.read().await;
        let mut counts = TypesBySource::new();
        for record in records.iter() {
            *counts
                .entry(record.source.clone())
                .or_default()
                .entry(record.ioc_type.clone())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_by_source_and_type(&self, source: &str) -> Result<TypeCounts> {
        let wanted = source.to_lowercase();
        Ok(self
            .group_by(|r| r.source == wanted, |r| r.ioc_type.as_str())
            .await)
    }

    async fn count_by_type_and_source(&self, ioc_type: &str) -> Result<SourceCounts> {
        let wanted = ioc_type.to_lowercase();
        Ok(self
            .group_by(|r| r.ioc_type == wanted, |r| r.source.as_str())
            .await)
    }
}
