//! Abstractions over the external publish/subscribe transport.
//!
//! The broker both consumes from the transport (via [`EventSubscriber`],
//! driven by the event bridge) and produces to it (via [`EventPublisher`],
//! for presence and typing events).

use async_trait::async_trait;
use beacon_protocol::{Envelope, ProtocolError};
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::message::BusMessage;

/// Errors from the external transport.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the transport.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A publish was rejected.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A subscription could not be established or broke.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Envelope could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Stream of messages from a pattern subscription.
///
/// The stream ends when the subscription closes. An `Err` item is
/// unrecoverable for that subscription.
pub type BusStream = BoxStream<'static, Result<BusMessage, BusError>>;

/// Publishes envelopes to their channel topic.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an envelope on `channel:<channelId>`.
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError>;
}

/// Subscribes to topics by pattern.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to every topic matching `pattern`.
    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, BusError>;
}
