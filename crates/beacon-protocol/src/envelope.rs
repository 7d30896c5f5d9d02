//! Event envelopes exchanged over the external pub/sub transport.
//!
//! Every event that reaches a client travels inside an [`Envelope`]. The
//! envelope is published on a per-channel topic (`channel:<channelId>`) and
//! the broker subscribes to all of them with a single wildcard pattern.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::ProtocolError;

/// Prefix of every per-channel topic.
pub const TOPIC_PREFIX: &str = "channel:";

/// Pattern matching every per-channel topic.
pub const CHANNEL_TOPIC_PATTERN: &str = "channel:*";

/// Topic name for a channel.
#[must_use]
pub fn topic_for(channel_id: &str) -> String {
    format!("{TOPIC_PREFIX}{channel_id}")
}

/// Extract the channel id from a per-channel topic name.
#[must_use]
pub fn channel_from_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix(TOPIC_PREFIX)
}

/// Envelope event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "message:created")]
    MessageCreated,
    #[serde(rename = "message:updated")]
    MessageUpdated,
    #[serde(rename = "message:deleted")]
    MessageDeleted,
    #[serde(rename = "typing:start")]
    TypingStart,
    #[serde(rename = "typing:stop")]
    TypingStop,
    #[serde(rename = "presence:join")]
    PresenceJoin,
    #[serde(rename = "presence:leave")]
    PresenceLeave,
    /// Any type this broker does not interpret. Still fanned out unchanged.
    #[serde(other)]
    Other,
}

impl EventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MessageCreated => "message:created",
            EventType::MessageUpdated => "message:updated",
            EventType::MessageDeleted => "message:deleted",
            EventType::TypingStart => "typing:start",
            EventType::TypingStop => "typing:stop",
            EventType::PresenceJoin => "presence:join",
            EventType::PresenceLeave => "presence:leave",
            EventType::Other => "other",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Target channel.
    #[serde(rename = "channelId")]
    pub channel_id: String,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: i64,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(event_type: EventType, channel_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            channel_id: channel_id.into(),
            timestamp: unix_now(),
            data,
        }
    }

    /// Create an envelope from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn with_data<T: Serialize>(
        event_type: EventType,
        channel_id: impl Into<String>,
        data: &T,
    ) -> Result<Self, ProtocolError> {
        let data = serde_json::to_value(data)?;
        Ok(Self::new(event_type, channel_id, data))
    }

    /// `presence:join` for a user entering a channel.
    #[must_use]
    pub fn presence_join(channel_id: impl Into<String>, user_id: &str, user_name: &str) -> Self {
        Self::new(
            EventType::PresenceJoin,
            channel_id,
            json!({ "userId": user_id, "userName": user_name }),
        )
    }

    /// `presence:leave` for a user leaving a channel.
    #[must_use]
    pub fn presence_leave(channel_id: impl Into<String>, user_id: &str, user_name: &str) -> Self {
        Self::new(
            EventType::PresenceLeave,
            channel_id,
            json!({ "userId": user_id, "userName": user_name }),
        )
    }

    /// `typing:start` reported by a client.
    #[must_use]
    pub fn typing_start(
        channel_id: impl Into<String>,
        user_id: &str,
        user_name: &str,
        thread_id: Option<&str>,
    ) -> Self {
        Self::new(
            EventType::TypingStart,
            channel_id,
            typing_data(user_id, user_name, thread_id),
        )
    }

    /// `typing:stop` reported by a client.
    #[must_use]
    pub fn typing_stop(
        channel_id: impl Into<String>,
        user_id: &str,
        user_name: &str,
        thread_id: Option<&str>,
    ) -> Self {
        Self::new(
            EventType::TypingStop,
            channel_id,
            typing_data(user_id, user_name, thread_id),
        )
    }

    /// Topic this envelope is published on.
    #[must_use]
    pub fn topic(&self) -> String {
        topic_for(&self.channel_id)
    }

    /// Decode the payload into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(T::deserialize(&self.data)?)
    }
}

fn typing_data(user_id: &str, user_name: &str, thread_id: Option<&str>) -> Value {
    let mut data = json!({ "userId": user_id, "userName": user_name });
    if let (Some(thread_id), Some(map)) = (thread_id, data.as_object_mut()) {
        map.insert("threadId".to_string(), Value::String(thread_id.to_string()));
    }
    data
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Payload of `message:created` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreatedData {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub author_avatar: String,
    #[serde(default)]
    pub created_at: String,
}

/// Payload of `typing:*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingData {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Payload of `presence:*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
}
