//! Transport-neutral frame and error types.
//!
//! The connection pumps only see a stream of [`Frame`]s and a sink
//! accepting them, so any message-oriented socket can be plugged in.

use bytes::Bytes;
use thiserror::Error;

/// A frame on a message-oriented socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 application payload.
    Text(Bytes),
    /// Binary application payload.
    Binary(Bytes),
    /// Liveness check.
    Ping(Bytes),
    /// Liveness reply.
    Pong(Bytes),
    /// Close handshake.
    Close,
}

impl Frame {
    /// Whether the frame carries application data.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Frame::Text(_) | Frame::Binary(_))
    }
}

/// Transport errors.
///
/// Every variant ends the affected connection only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Read or write deadline expired.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol upgrade failed.
    #[error("Upgrade failed: {0}")]
    Upgrade(String),
}
