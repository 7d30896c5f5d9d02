//! In-memory bus for single-node deployments.

use async_trait::async_trait;
use beacon_protocol::{codec, Envelope};
use futures_util::stream::{self, StreamExt};
use tenvis_beacon_core::{BusError, BusMessage, BusStream, EventPublisher, EventSubscriber};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default number of messages buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Whether `topic` matches `pattern`.
///
/// A trailing `*` matches any suffix; otherwise the match is exact.
#[must_use]
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

/// Publish/subscribe within one process.
///
/// Every subscriber sees every message published after it subscribed and
/// filters by its own pattern. A subscriber that falls more than the
/// buffer capacity behind loses the oldest messages.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryBus {
    /// Bus buffering up to `capacity` messages per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish raw bytes on a topic.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish_raw(&self, topic: impl Into<String>, payload: impl Into<bytes::Bytes>) -> usize {
        let message = BusMessage::new(topic, payload);
        trace!(topic = %message.topic, size = message.payload.len(), "Publishing");
        self.sender.send(message).unwrap_or(0)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for MemoryBus {
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError> {
        let payload = codec::encode(envelope)?;
        self.publish_raw(envelope.topic(), payload);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryBus {
    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, BusError> {
        let receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = stream::unfold(receiver, move |mut receiver| {
            let pattern = pattern.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) if topic_matches(&pattern, &message.topic) => {
                            return Some((Ok(message), receiver));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(pattern = %pattern, skipped, "Subscriber lagged, messages lost");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
