use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Error surfaced by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The transport rejected the operation.
    #[error("bus transport failure: {0}")]
    Transport(String),
}

/// A live subscription to one bus channel.
#[async_trait]
pub trait BusSubscriber: Send {
    /// Receive the next message, or `None` once the channel is closed.
    /// Subscribers that fall behind skip the missed messages rather than
    /// erroring.
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, BusError>;
}

/// The channel-oriented broker the streaming layer publishes through.
///
/// `publish` is fire-and-forget fan-out, `subscribe` yields an independent
/// reader. Delivery is at-most-once per subscriber; ordering holds per
/// channel. Out-of-process brokers (Redis and friends) implement the same
/// trait; the in-process [`MemoryBus`] backs single-node deployments and
/// tests.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on `channel`. Publishing to a channel with no
    /// subscribers is not an error.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Open a subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscriber>, BusError>;
}

const CHANNEL_CAPACITY: usize = 1024;

/// In-process bus over per-channel broadcast channels.
///
/// Channels materialize on first use and are garbage-collected once every
/// subscriber is gone and a publish observes the empty channel.
#[derive(Default)]
pub struct MemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Arc<[u8]>>>>,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Arc<[u8]>> {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        if let Some(tx) = channels.get(channel) {
            if tx.send(Arc::from(payload)).is_err() {
                // No live subscribers; drop the channel entry.
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscriber>, BusError> {
        let rx = self.sender(channel).subscribe();
        Ok(Box::new(MemorySubscriber { rx }))
    }
}

struct MemorySubscriber {
    rx: broadcast::Receiver<Arc<[u8]>>,
}

#[async_trait]
impl BusSubscriber for MemorySubscriber {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, BusError> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(Some(payload.to_vec())),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "bus subscriber lagged; skipping missed messages");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("stream:test").await.unwrap();
        let mut b = bus.subscribe("stream:test").await.unwrap();
        bus.publish("stream:test", b"hello").await.unwrap();
        assert_eq!(a.next_message().await.unwrap().unwrap(), b"hello");
        assert_eq!(b.next_message().await.unwrap().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        bus.publish("stream:empty", b"x").await.unwrap();
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("stream:a").await.unwrap();
        bus.publish("stream:b", b"other").await.unwrap();
        bus.publish("stream:a", b"mine").await.unwrap();
        assert_eq!(a.next_message().await.unwrap().unwrap(), b"mine");
    }
}
