//! Internal message types for Beacon.

use bytes::Bytes;

use crate::connection::ChannelId;

/// A payload addressed to every connection in one channel.
///
/// The payload is the envelope exactly as it arrived from the transport;
/// it is shared, never re-serialized, on its way to each connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    /// Target channel.
    pub channel_id: ChannelId,
    /// Serialized envelope.
    pub payload: Bytes,
}

impl BroadcastMessage {
    /// Create a new broadcast message.
    #[must_use]
    pub fn new(channel_id: impl Into<ChannelId>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel_id: channel_id.into(),
            payload: payload.into(),
        }
    }
}

/// A raw message received from the external transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a new bus message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
