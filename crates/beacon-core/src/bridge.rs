//! Bridge from the external transport into the hub.

use crate::hub::ConnectionHub;
use crate::message::{BroadcastMessage, BusMessage};
use crate::pubsub::{BusError, EventSubscriber};
use beacon_protocol::{codec, CHANNEL_TOPIC_PATTERN};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Forwards every envelope published on a channel topic to the hub.
///
/// The bridge holds one pattern subscription for the whole process. When
/// that subscription ends, fan-out stops until the process is restarted.
pub struct EventBridge {
    subscriber: Arc<dyn EventSubscriber>,
    hub: Arc<ConnectionHub>,
    pattern: String,
}

impl EventBridge {
    /// Create a bridge subscribed to all per-channel topics.
    #[must_use]
    pub fn new(subscriber: Arc<dyn EventSubscriber>, hub: Arc<ConnectionHub>) -> Self {
        Self {
            subscriber,
            hub,
            pattern: CHANNEL_TOPIC_PATTERN.to_string(),
        }
    }

    /// Use a different subscription pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Run until the subscription closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established or the
    /// transport reports an unrecoverable failure.
    pub async fn run(self) -> Result<(), BusError> {
        let mut stream = self.subscriber.psubscribe(&self.pattern).await?;
        info!(pattern = %self.pattern, "Event bridge subscribed");

        while let Some(item) = stream.next().await {
            self.forward(item?);
        }

        warn!(pattern = %self.pattern, "Subscription closed, event bridge stopped");
        Ok(())
    }

    /// Decode one transport message and hand it to the hub.
    ///
    /// Returns `false` if the message was discarded or dropped.
    pub fn forward(&self, message: BusMessage) -> bool {
        let envelope = match codec::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    size = message.payload.len(),
                    error = %e,
                    "Discarding undecodable event"
                );
                debug!(payload = %String::from_utf8_lossy(&message.payload), "Undecodable payload");
                return false;
            }
        };

        trace!(
            topic = %message.topic,
            event = %envelope.event_type,
            channel = %envelope.channel_id,
            timestamp = envelope.timestamp,
            "Forwarding event"
        );

        self.hub
            .broadcast(BroadcastMessage::new(envelope.channel_id, message.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHandle, ConnectionInfo};
    use crate::hub::HubConfig;
    use crate::pubsub::testing::RecordingPublisher;
    use crate::pubsub::BusStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::channel::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    type Feed = mpsc::UnboundedSender<Result<BusMessage, BusError>>;

    /// Subscriber handing out a pre-built stream once.
    struct ChannelSubscriber {
        stream: Mutex<Option<BusStream>>,
        pattern: Mutex<Option<String>>,
    }

    impl ChannelSubscriber {
        fn new() -> (Arc<Self>, Feed) {
            let (tx, rx) = mpsc::unbounded();
            let subscriber = Arc::new(Self {
                stream: Mutex::new(Some(rx.boxed())),
                pattern: Mutex::new(None),
            });
            (subscriber, tx)
        }
    }

    #[async_trait]
    impl EventSubscriber for ChannelSubscriber {
        async fn psubscribe(&self, pattern: &str) -> Result<BusStream, BusError> {
            *self.pattern.lock().unwrap() = Some(pattern.to_string());
            self.stream
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| BusError::Subscribe("already subscribed".into()))
        }
    }

    fn start_hub() -> Arc<ConnectionHub> {
        let publisher = Arc::new(RecordingPublisher::default());
        ConnectionHub::start(HubConfig::default(), publisher)
    }

    async fn member(hub: &ConnectionHub, channel: &str) -> tokio::sync::mpsc::Receiver<Bytes> {
        let info = Arc::new(ConnectionInfo::new(channel, "u", "U"));
        let (handle, rx) = ConnectionHandle::new(info, 8);
        hub.register(handle).await;
        rx
    }

    #[tokio::test]
    async fn test_forwards_exact_bytes_to_matching_channel() {
        let hub = start_hub();
        let mut c1 = member(&hub, "c1").await;
        let mut c2 = member(&hub, "c2").await;

        let (subscriber, tx) = ChannelSubscriber::new();
        let bridge = EventBridge::new(subscriber.clone(), Arc::clone(&hub));
        let task = tokio::spawn(bridge.run());

        let raw = concat!(
            r#"{"type":"message:created","channelId":"c1","#,
            r#""timestamp":1700000000,"data":{"id":"m1"}}"#
        );
        let raw = Bytes::from_static(raw.as_bytes());
        tx.unbounded_send(Ok(BusMessage::new("channel:c1", b"{not json".to_vec())))
            .unwrap();
        tx.unbounded_send(Ok(BusMessage::new("channel:c1", raw.clone())))
            .unwrap();

        let received = timeout(Duration::from_secs(1), c1.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, raw);
        assert!(c2.try_recv().is_err());

        drop(tx);
        assert!(task.await.unwrap().is_ok());
        assert_eq!(
            subscriber.pattern.lock().unwrap().as_deref(),
            Some("channel:*")
        );
    }

    #[tokio::test]
    async fn test_transport_error_stops_bridge() {
        let hub = start_hub();
        let (subscriber, tx) = ChannelSubscriber::new();

        tx.unbounded_send(Err(BusError::Subscribe("connection reset".into())))
            .unwrap();

        let result = EventBridge::new(subscriber, hub).run().await;
        assert!(matches!(result, Err(BusError::Subscribe(_))));
    }

    #[tokio::test]
    async fn test_forward_routes_by_envelope_channel() {
        let hub = start_hub();
        let mut c1 = member(&hub, "c1").await;
        let (subscriber, _tx) = ChannelSubscriber::new();
        let bridge = EventBridge::new(subscriber, Arc::clone(&hub))
            .with_pattern("channel:c*");

        assert_eq!(bridge.pattern, "channel:c*");
        let not_an_envelope = BusMessage::new("channel:c1", b"[]".to_vec());
        assert!(!bridge.forward(not_an_envelope));
        assert!(bridge.forward(BusMessage::new(
            "channel:c1",
            br#"{"type":"typing:stop","channelId":"c1"}"#.to_vec(),
        )));

        let received = timeout(Duration::from_secs(1), c1.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(received.starts_with(b"{\"type\":\"typing:stop\""));
    }
}
