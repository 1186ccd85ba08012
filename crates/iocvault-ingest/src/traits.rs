//! Transport and hand-off traits for the ingestion path.

use async_trait::async_trait;
use bytes::Bytes;
use iocvault_core::Batch;

use crate::config::BrokerConfig;
use crate::error::Result;

/// A live stream of raw broker payloads.
///
/// Messages are already acknowledged when they come out of `recv`.
#[async_trait]
pub trait MessageFeed: Send {
    /// Next payload, or `None` once the feed is closed.
    ///
    /// An `Err` means the transport failed; the feed should not be polled
    /// again afterwards.
    async fn recv(&mut self) -> Option<Result<Bytes>>;
}

/// A broker that can open a subscription on a topic.
#[async_trait]
pub trait Broker: Send + Sync {
    type Feed: MessageFeed + 'static;

    /// Make a single connection attempt and subscribe to `config.topic`.
    async fn open(&self, config: &BrokerConfig) -> Result<Self::Feed>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Receives completed batches from the consume loop.
///
/// `dispatch` must not block: it either accepts the batch for asynchronous
/// persistence or refuses it straight away.
pub trait BatchSink: Send + Sync {
    type Error: std::fmt::Display;

    fn dispatch(&self, batch: Batch) -> std::result::Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedFeed {
        messages: VecDeque<Result<Bytes>>,
    }

    #[async_trait]
    impl MessageFeed for ScriptedFeed {
        async fn recv(&mut self) -> Option<Result<Bytes>> {
            self.messages.pop_front()
        }
    }

    struct NullBroker;

    #[async_trait]
    impl Broker for NullBroker {
        type Feed = ScriptedFeed;

        async fn open(&self, _config: &BrokerConfig) -> Result<ScriptedFeed> {
            Ok(ScriptedFeed {
                messages: VecDeque::new(),
            })
        }

        fn name(&self) -> &str {
            "null"
        }
    }

    struct CollectingSink(Mutex<Vec<Batch>>);

    impl BatchSink for CollectingSink {
        type Error = String;

        fn dispatch(&self, batch: Batch) -> std::result::Result<(), String> {
            self.0.lock().unwrap().push(batch);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_feed_is_object_safe() {
        let mut feed: Box<dyn MessageFeed> = Box::new(ScriptedFeed {
            messages: VecDeque::from(vec![
                Ok(Bytes::from_static(b"a")),
                Err(IngestError::SourceError("gone".into())),
            ]),
        });
        assert!(matches!(feed.recv().await, Some(Ok(_))));
        assert!(matches!(feed.recv().await, Some(Err(_))));
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broker_opens_feed() {
        let broker = NullBroker;
        let mut feed = broker.open(&BrokerConfig::default()).await.unwrap();
        assert!(feed.recv().await.is_none());
        assert_eq!(broker.name(), "null");
    }

    #[test]
    fn test_sink_collects() {
        let sink = CollectingSink(Mutex::new(Vec::new()));
        sink.dispatch(Vec::new()).unwrap();
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
