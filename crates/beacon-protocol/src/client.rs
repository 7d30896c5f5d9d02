//! Messages originated by WebSocket clients.
//!
//! Clients may only report ephemeral activity. Anything else they send is
//! recognised as [`ClientEvent::Unknown`] and ignored by the broker.

use serde_json::Value;

use crate::codec::ProtocolError;

/// A decoded client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// `{"type":"typing:start","data":{"threadId"?:..}}`
    TypingStart { thread_id: Option<String> },
    /// `{"type":"typing:stop","data":{"threadId"?:..}}`
    TypingStop { thread_id: Option<String> },
    /// Any other `type`.
    Unknown(String),
}

impl ClientEvent {
    /// Parse a raw client frame.
    ///
    /// A missing or non-object `data` member, or a non-string `threadId`,
    /// is treated as "no thread".
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with a string
    /// `type` field.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(data)?;
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        let thread_id = object
            .get("data")
            .and_then(|d| d.get("threadId"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        Ok(match kind {
            "typing:start" => ClientEvent::TypingStart { thread_id },
            "typing:stop" => ClientEvent::TypingStop { thread_id },
            other => ClientEvent::Unknown(other.to_owned()),
        })
    }

    /// Wire name of the event.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            ClientEvent::TypingStart { .. } => "typing:start",
            ClientEvent::TypingStop { .. } => "typing:stop",
            ClientEvent::Unknown(kind) => kind,
        }
    }
}
