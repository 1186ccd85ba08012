//! In-process broker backed by a tokio channel.
//!
//! Useful for embedding the pipeline without an external broker and for
//! driving the consume loop from tests. Dropping every sender closes the feed.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::BrokerConfig;
use crate::error::{IngestError, Result};
use crate::traits::{Broker, MessageFeed};

/// A [`MessageFeed`] reading payloads from an mpsc channel.
#[derive(Debug)]
pub struct ChannelFeed {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelFeed {
    /// Create a feed and the sender that publishes into it.
    pub fn new(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl MessageFeed for ChannelFeed {
    async fn recv(&mut self) -> Option<Result<Bytes>> {
        self.rx.recv().await.map(Ok)
    }
}

/// A [`Broker`] that hands out one pre-built [`ChannelFeed`].
#[derive(Debug)]
pub struct ChannelBroker {
    feed: Mutex<Option<ChannelFeed>>,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, feed) = ChannelFeed::new(capacity);
        (
            tx,
            Self {
                feed: Mutex::new(Some(feed)),
            },
        )
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    type Feed = ChannelFeed;

    async fn open(&self, config: &BrokerConfig) -> Result<ChannelFeed> {
        let mut slot = self
            .feed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.take().ok_or_else(|| {
            IngestError::ConnectionError(format!(
                "channel feed for '{}' was already opened",
                config.topic
            ))
        })
    }

    fn name(&self) -> &str {
        "channel"
    }
}
