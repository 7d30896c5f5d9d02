//! JSON codec for envelopes.
//!
//! Envelopes are plain JSON documents. Payloads received from the external
//! transport are never re-encoded on the way to clients; this codec is used
//! when the broker itself originates an event and when it needs to inspect
//! an incoming one.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed or mistyped JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The message is valid JSON but not an object.
    #[error("Message is not a JSON object")]
    NotAnObject,

    /// The message has no string `type` field.
    #[error("Message has no 'type' field")]
    MissingType,
}

/// Encode an envelope to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(envelope)?))
}

/// Decode an envelope from bytes.
///
/// # Errors
///
/// Returns an error if the data is not a well-formed envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}
