//! # beacon-protocol
//!
//! Wire definitions for the Beacon fan-out broker.
//!
//! Two message shapes cross the process boundary:
//!
//! - **Envelope** - `{type, channelId, timestamp, data}`, carried over the
//!   external pub/sub transport on topic `channel:<channelId>` and
//!   forwarded byte-for-byte to WebSocket clients.
//! - **Client events** - the small set of messages a client may send
//!   upstream (`typing:start`, `typing:stop`).
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, topic_for, Envelope};
//!
//! let envelope = Envelope::presence_join("c1", "u1", "Ann");
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//!
//! assert_eq!(decoded.channel_id, "c1");
//! assert_eq!(topic_for(&decoded.channel_id), "channel:c1");
//! ```

pub mod client;
pub mod codec;
pub mod envelope;

pub use client::ClientEvent;
pub use codec::{decode, encode, ProtocolError};
pub use envelope::{
    channel_from_topic, topic_for, Envelope, EventType, MessageCreatedData, PresenceData,
    TypingData, CHANNEL_TOPIC_PATTERN, TOPIC_PREFIX,
};
