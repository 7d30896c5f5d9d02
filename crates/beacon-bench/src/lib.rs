//! Shared fixtures for the Beacon benchmarks.

use bytes::Bytes;
use std::sync::Arc;
use tenvis_beacon_bus::MemoryBus;
use tenvis_beacon_core::{ConnectionHandle, ConnectionHub, ConnectionInfo, HubConfig};
use tokio::sync::mpsc;

/// A `message:created` envelope with a `content` of `content_len` bytes.
#[must_use]
pub fn message_created(channel_id: &str, content_len: usize) -> Bytes {
    let envelope = serde_json::json!({
        "type": "message:created",
        "channelId": channel_id,
        "timestamp": 1_700_000_000,
        "data": {
            "id": "m1",
            "content": "x".repeat(content_len),
            "authorId": "u1",
            "authorName": "Ann",
            "createdAt": "2023-11-14T22:13:20Z",
        }
    });
    let encoded = serde_json::to_vec(&envelope).unwrap_or_default();
    Bytes::from(encoded)
}

/// Start a hub whose presence events go nowhere.
#[must_use]
pub fn hub(config: HubConfig) -> Arc<ConnectionHub> {
    ConnectionHub::start(config, Arc::new(MemoryBus::default()))
}

/// Register `count` connections on `channel_id`, returning their queues.
pub async fn members(
    hub: &ConnectionHub,
    channel_id: &str,
    count: usize,
    capacity: usize,
) -> Vec<mpsc::Receiver<Bytes>> {
    let mut receivers = Vec::with_capacity(count);
    for i in 0..count {
        let info = Arc::new(ConnectionInfo::new(channel_id, format!("u{i}"), "bench"));
        let (handle, rx) = ConnectionHandle::new(info, capacity);
        hub.register(handle).await;
        receivers.push(rx);
    }
    receivers
}
