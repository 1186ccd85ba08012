//! Startup connection to the broker.
//!
//! The connector makes one attempt, then up to `connect_retries` more with a
//! fixed `retry_delay_secs` pause, logging each failure. When the budget is
//! spent it returns [`IngestError::ConnectionError`] and the caller must not
//! start serving. There is no reconnection once the feed is live.

use iocvault_core::retry_flat;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BrokerConfig;
use crate::error::{IngestError, Result};
use crate::traits::Broker;

/// Owns the broker handle and its configuration for the life of the process.
pub struct BrokerConnector<B> {
    broker: B,
    config: BrokerConfig,
}

impl<B: Broker> BrokerConnector<B> {
    pub fn new(broker: B, config: BrokerConfig) -> Self {
        Self { broker, config }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Open the feed, retrying on failure.
    ///
    /// Returns [`IngestError::Cancelled`] if `cancel` fires first, including
    /// during a retry pause.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<B::Feed> {
        self.config.validate()?;
        let policy = self.config.retry_policy();

        info!(
            broker = self.broker.name(),
            address = %self.config.address,
            topic = %self.config.topic,
            "Connecting to broker"
        );

        let attempt = retry_flat(&policy, self.broker.name(), || {
            self.broker.open(&self.config)
        });

        let feed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            res = attempt => res.map_err(|e| {
                IngestError::ConnectionError(format!(
                    "{} unreachable after {} attempts: {}",
                    self.config.address,
                    policy.total_attempts(),
                    e
                ))
            })?,
        };

        info!(topic = %self.config.topic, "Subscribed to broker topic");
        Ok(feed)
    }
}
