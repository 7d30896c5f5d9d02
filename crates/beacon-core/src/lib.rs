//! # beacon-core
//!
//! Core registry and fan-out machinery for the Beacon broker.
//!
//! - **ConnectionHub** - sharded channel → connection registry with one
//!   worker per bucket
//! - **Connection** - identity and bounded outbound queue of a client
//! - **EventBridge** - forwards externally published envelopes into the hub
//! - **PubSub** - traits over the external publish/subscribe transport
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ EventBridge │────▶│ Hub bucket  │────▶│ Connection  │
//! └─────────────┘     └─────────────┘     │   worker    │     │  outbound   │
//!        ▲                                └─────────────┘     └─────────────┘
//!        │                                       │
//!        └───────── presence / typing ◀──────────┘
//! ```

pub mod bridge;
pub mod connection;
pub mod hub;
pub mod message;
pub mod pubsub;

pub use bridge::EventBridge;
pub use connection::{ChannelId, ConnectionHandle, ConnectionId, ConnectionInfo};
pub use hub::{ConnectionHub, HubConfig, HubStats};
pub use message::{BroadcastMessage, BusMessage};
pub use pubsub::{BusError, BusStream, EventPublisher, EventSubscriber};
