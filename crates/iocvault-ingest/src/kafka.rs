//! Kafka Broker
//!
//! Consumes the indicator topic with an `rdkafka` [`StreamConsumer`].
//!
//! ## Client Settings
//!
//! | Key                   | Value                           |
//! |-----------------------|---------------------------------|
//! | `bootstrap.servers`   | `BrokerConfig::address`         |
//! | `group.id`            | `BrokerConfig::group_id`        |
//! | `auto.offset.reset`   | `BrokerConfig::auto_offset_reset` |
//! | `enable.auto.commit`  | `true`                          |
//! | `session.timeout.ms`  | `10000`                         |
//!
//! Offsets are committed automatically, so a message counts as acknowledged
//! once it has been received, whatever happens to it afterwards. Extra
//! client properties (TLS, SASL) can be layered on with
//! [`KafkaBroker::with_option`].
//!
//! `open` fetches topic metadata before subscribing so an unreachable
//! cluster fails the attempt instead of surfacing later inside `recv`.
//!
//! ## Receive Errors
//!
//! librdkafka reconnects on its own, so transport and coordinator errors
//! from `recv` (see [`is_transient`]) are logged and the feed keeps
//! waiting. Any other error is handed to the consume loop, which stops.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::Message;
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::{IngestError, Result};
use crate::traits::{Broker, MessageFeed};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct KafkaBroker {
    overrides: HashMap<String, String>,
}

impl KafkaBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an additional librdkafka client property.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    fn client_config(&self, config: &BrokerConfig) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &config.address)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("session.timeout.ms", "10000");
        for (key, value) in &self.overrides {
            client.set(key, value);
        }
        client
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    type Feed = KafkaFeed;

    async fn open(&self, config: &BrokerConfig) -> Result<KafkaFeed> {
        let consumer: StreamConsumer = self
            .client_config(config)
            .create()
            .map_err(|e| IngestError::ConnectionError(format!("failed to create consumer: {}", e)))?;

        // fetch_metadata blocks on librdkafka
        let topic = config.topic.clone();
        let consumer = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(Some(topic.as_str()), METADATA_TIMEOUT)
                .map(|_| consumer)
        })
        .await
        .map_err(|e| IngestError::ConnectionError(format!("metadata task failed: {}", e)))?
        .map_err(|e| IngestError::ConnectionError(format!("metadata fetch failed: {}", e)))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| IngestError::ConnectionError(format!("subscribe failed: {}", e)))?;

        debug!(topic = %config.topic, group = %config.group_id, "Kafka consumer subscribed");
        Ok(KafkaFeed { consumer })
    }

    fn name(&self) -> &str {
        "kafka"
    }
}

/// Payload feed over a subscribed [`StreamConsumer`].
pub struct KafkaFeed {
    consumer: StreamConsumer,
}

#[async_trait]
impl MessageFeed for KafkaFeed {
    async fn recv(&mut self) -> Option<Result<Bytes>> {
        loop {
            match self.consumer.recv().await {
                Ok(message) => {
                    return Some(Ok(message
                        .payload()
                        .map(Bytes::copy_from_slice)
                        .unwrap_or_default()))
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "Kafka receive error, waiting for the client to recover");
                }
                Err(e) => return Some(Err(IngestError::SourceError(e.to_string()))),
            }
        }
    }
}

/// Errors librdkafka recovers from without intervention.
pub fn is_transient(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::PartitionEOF
                | RDKafkaErrorCode::CoordinatorLoadInProgress
                | RDKafkaErrorCode::CoordinatorNotAvailable
                | RDKafkaErrorCode::NotCoordinator
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_sets_auto_commit() {
        let config = BrokerConfig {
            address: "kafka-1:9092,kafka-2:9092".to_string(),
            group_id: "ioc-writers".to_string(),
            ..Default::default()
        };
        let client = KafkaBroker::new().client_config(&config);

        assert_eq!(client.get("bootstrap.servers"), Some("kafka-1:9092,kafka-2:9092"));
        assert_eq!(client.get("group.id"), Some("ioc-writers"));
        assert_eq!(client.get("enable.auto.commit"), Some("true"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
    }

    #[test]
    fn test_transport_errors_are_transient() {
        for code in [
            RDKafkaErrorCode::BrokerTransportFailure,
            RDKafkaErrorCode::AllBrokersDown,
            RDKafkaErrorCode::OperationTimedOut,
        ] {
            assert!(is_transient(&KafkaError::MessageConsumption(code)), "{:?}", code);
        }
    }

    #[test]
    fn test_other_errors_end_the_feed() {
        assert!(!is_transient(&KafkaError::MessageConsumption(RDKafkaErrorCode::Fatal)));
        assert!(!is_transient(&KafkaError::MessageConsumption(
            RDKafkaErrorCode::TopicAuthorizationFailed
        )));
        assert!(!is_transient(&KafkaError::ClientCreation("bad config".into())));
    }

    #[test]
    fn test_overrides_are_applied_last() {
        let client = KafkaBroker::new()
            .with_option("security.protocol", "SASL_SSL")
            .with_option("session.timeout.ms", "30000")
            .client_config(&BrokerConfig::default());

        assert_eq!(client.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client.get("session.timeout.ms"), Some("30000"));
    }
}
