//! PostgreSQL Storage Backend
//!
//! Production backend for indicator records, built on a shared `sqlx`
//! connection pool. Every worker-pool task borrows connections from the same
//! pool; thread safety is delegated to `PgPool`.
//!
//! ## Schema
//!
//! Applied at startup via `sqlx::migrate!("./migrations")`:
//!
//! | Column | Type | Notes |
//! |--------|------|-------|
//! | `seq` | BIGSERIAL | insertion order, used for stable paging |
//! | `id` | TEXT | opaque, not unique |
//! | `source`, `type`, `value` | TEXT | stored lowercase |
//! | `first_seen`, `last_seen` | TIMESTAMPTZ NULL | `NULL` round-trips as `None` |
//! | `tags` | TEXT | JSON array |
//! | `additional_data` | TEXT | JSON object |
//!
//! ## Runtime Queries
//!
//! Queries use `sqlx::query` rather than the compile-time macros, so the
//! crate builds without a `DATABASE_URL`.
//!
//! ## Filtering
//!
//! A filter is a plain substring. `%`, `_` and `\` in the filter are escaped
//! before it is wrapped as `%filter%`, so they match literally.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use iocvault_core::{
    retry_flat, Batch, IndicatorRecord, LoadRequest, SourceCounts, TypeCounts, TypesBySource,
};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PostgresConfig;
use crate::error::{Result, StorageError};
use crate::{InboundRecord, IocStore, OutboundRecord, STREAM_BUFFER};

const INSERT_RECORD: &str = "INSERT INTO ioc_data \
     (id, source, first_seen, last_seen, type, value, tags, additional_data) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const SELECT_PAGE: &str = "SELECT id, source, first_seen, last_seen, type, value, tags, additional_data \
     FROM ioc_data \
     WHERE ($1::TEXT IS NULL \
        OR id LIKE $1 OR source LIKE $1 OR type LIKE $1 OR value LIKE $1 OR tags LIKE $1) \
     ORDER BY seq \
     LIMIT $2 OFFSET $3";

pub struct PostgresIocStore {
    pool: PgPool,
}

impl PostgresIocStore {
    /// Connect with the configured flat retry, then apply migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        let policy = config.retry_policy();

        let pool = retry_flat(&policy, "postgres", || {
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(options.clone())
        })
        .await
        .map_err(|e| {
            StorageError::Connection(format!(
                "failed to connect to {}:{} after {} attempts: {}",
                config.host,
                config.port,
                policy.total_attempts(),
                e
            ))
        })?;

        info!(host = %config.host, port = config.port, database = %config.database, "Connected to PostgreSQL");
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and apply migrations.
    pub async fn with_pool(pool: PgPool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Storage migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert(tx: &mut Transaction<'_, Postgres>, record: &IndicatorRecord) -> Result<()> {
        sqlx::query(INSERT_RECORD)
            .bind(&record.id)
            .bind(&record.source)
            .bind(record.first_seen)
            .bind(record.last_seen)
            .bind(&record.ioc_type)
            .bind(&record.value)
            .bind(serde_json::to_string(&record.tags)?)
            .bind(serde_json::to_string(&record.additional_data)?)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn grouped(&self, sql: &str, arg: Option<String>) -> Result<HashMap<String, i64>> {
        let mut query = sqlx::query_as::<_, (String, i64)>(sql);
        if let Some(arg) = arg {
            query = query.bind(arg);
        }
        Ok(query.fetch_all(&self.pool).await?.into_iter().collect())
    }

    async fn scalar(&self, sql: &str, arg: Option<String>) -> Result<i64> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(arg) = arg {
            query = query.bind(arg);
        }
        Ok(query.fetch_one(&self.pool).await?)
    }
}

fn like_pattern(filter: Option<&str>) -> Option<String> {
    filter.map(|f| {
        let escaped = f
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{}%", escaped)
    })
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn record_from_row(row: &PgRow) -> Result<IndicatorRecord> {
    let tags: String = row.try_get("tags")?;
    let additional_data: String = row.try_get("additional_data")?;
    Ok(IndicatorRecord {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        first_seen: row.try_get::<Option<DateTime<Utc>>, _>("first_seen")?,
        last_seen: row.try_get::<Option<DateTime<Utc>>, _>("last_seen")?,
        ioc_type: row.try_get("type")?,
        value: row.try_get("value")?,
        tags: serde_json::from_str(&tags)?,
        additional_data: serde_json::from_str(&additional_data)?,
    })
}

#[async_trait]
impl IocStore for PostgresIocStore {
    async fn write_batch(&self, records: Batch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::insert(&mut tx, &record.normalized()).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read_page(&self, request: &LoadRequest) -> Result<Vec<IndicatorRecord>> {
        let rows = sqlx::query(SELECT_PAGE)
            .bind(like_pattern(request.filter()))
            .bind(clamp(request.limit))
            .bind(clamp(request.offset))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn stream_write(
        &self,
        mut records: mpsc::Receiver<InboundRecord>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tx.rollback().await?;
                    debug!(written, "Stream write cancelled, transaction rolled back");
                    return Err(StorageError::Cancelled);
                }
                item = records.recv() => item,
            };

            match item {
                Some(Ok(record)) => {
                    if let Err(e) = Self::insert(&mut tx, &record.normalized()).await {
                        warn!(written, error = %e, "Stream write insert failed, rolling back");
                        tx.rollback().await?;
                        return Err(e);
                    }
                    written += 1;
                }
                Some(Err(e)) => {
                    tx.rollback().await?;
                    debug!(written, error = %e, "Inbound stream aborted, transaction rolled back");
                    return Err(e.into());
                }
                None => break,
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn stream_read(
        &self,
        request: LoadRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<OutboundRecord>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let mut rows = sqlx::query(SELECT_PAGE)
                .bind(like_pattern(request.filter()))
                .bind(clamp(request.limit))
                .bind(clamp(request.offset))
                .fetch(&pool);
            let mut sent = 0u64;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = rows.next() => next,
                };
                let item = match next {
                    Some(Ok(row)) => record_from_row(&row),
                    Some(Err(e)) => Err(e.into()),
                    None => break,
                };
                let failed = item.is_err();

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    res = tx.send(item) => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
                if failed {
                    break;
                }
                sent += 1;
            }
            debug!(sent, "PostgreSQL stream read finished");
        });

        Ok(rx)
    }

    async fn count(&self) -> Result<i64> {
        self.scalar("SELECT COUNT(*) FROM ioc_data", None).await
    }

    async fn count_by_type(&self) -> Result<TypeCounts> {
        self.grouped("SELECT type, COUNT(*) FROM ioc_data GROUP BY type", None)
            .await
    }

    async fn count_specific_type(&self, ioc_type: &str) -> Result<i64> {
        self.scalar(
            "SELECT COUNT(*) FROM ioc_data WHERE type = $1",
            Some(ioc_type.to_lowercase()),
        )
        .await
    }

    async fn count_by_source(&self) -> Result<SourceCounts> {
        self.grouped("SELECT source, COUNT(*) FROM ioc_data GROUP BY source", None)
            .await
    }

    async fn count_specific_source(&self, source: &str) -> Result<i64> {
        self.scalar(
            "SELECT COUNT(*) FROM ioc_data WHERE source = $1",
            Some(source.to_lowercase()),
        )
        .await
    }

    async fn count_types_by_source(&self) -> Result<TypesBySource> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT source, type, COUNT(*) FROM ioc_data GROUP BY source, type",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = TypesBySource::new();
        for (source, ioc_type, count) in rows {
            counts.entry(source).or_default().insert(ioc_type, count);
        }
        Ok(counts)
    }

    async fn count_by_source_and_type(&self, source: &str) -> Result<TypeCounts> {
        self.grouped(
            "SELECT type, COUNT(*) FROM ioc_data WHERE source = $1 GROUP BY type",
            Some(source.to_lowercase()),
        )
        .await
    }

    async fn count_by_type_and_source(&self, ioc_type: &str) -> Result<SourceCounts> {
        self.grouped(
            "SELECT source, COUNT(*) FROM ioc_data WHERE type = $1 GROUP BY source",
            Some(ioc_type.to_lowercase()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_wraps_and_escapes() {
        assert_eq!(like_pattern(None), None);
        assert_eq!(like_pattern(Some("evil")).as_deref(), Some("%evil%"));
        assert_eq!(like_pattern(Some("50%_off")).as_deref(), Some("%50\\%\\_off%"));
        assert_eq!(like_pattern(Some("a\\b")).as_deref(), Some("%a\\\\b%"));
    }

    #[test]
    fn test_clamp_saturates() {
        assert_eq!(clamp(10), 10);
        assert_eq!(clamp(u64::MAX), i64::MAX);
    }
}
