//! Broker configuration.

use std::time::Duration;

use iocvault_core::ConnectRetryPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

fn default_address() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "ioc.normalized.queue".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_group_id() -> String {
    "iocvault".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_connect_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

/// Where to consume from and how large each batch is.
///
/// Built once at startup and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker bootstrap address.
    #[serde(default = "default_address")]
    pub address: String,

    /// Topic (queue) carrying normalized indicator records.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Records per dispatched batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Consumer group.
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// `earliest` or `latest`.
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,

    /// Retries after the first failed connection attempt.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            topic: default_topic(),
            batch_size: default_batch_size(),
            group_id: default_group_id(),
            auto_offset_reset: default_auto_offset_reset(),
            connect_retries: default_connect_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl BrokerConfig {
    pub fn retry_policy(&self) -> ConnectRetryPolicy {
        ConnectRetryPolicy::new(
            self.connect_retries,
            Duration::from_secs(self.retry_delay_secs),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(IngestError::ConfigError(
                "broker address must not be empty".to_string(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(IngestError::ConfigError(
                "topic must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(IngestError::ConfigError(
                "batch_size must be at least 1".to_string(),
            ));
        }
        match self.auto_offset_reset.as_str() {
            "earliest" | "latest" => Ok(()),
            other => Err(IngestError::ConfigError(format!(
                "invalid auto_offset_reset '{}': must be 'earliest' or 'latest'",
                other
            ))),
        }
    }
}
