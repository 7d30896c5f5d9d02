//! # beacon-bus
//!
//! Implementations of the external publish/subscribe transport.
//!
//! - [`RedisBus`] - Redis `PUBLISH` / `PSUBSCRIBE`, for multi-node
//!   deployments
//! - [`MemoryBus`] - in-process broadcast, for a single node and tests
//!
//! Both implement [`EventPublisher`](tenvis_beacon_core::EventPublisher) and
//! [`EventSubscriber`](tenvis_beacon_core::EventSubscriber).

pub mod memory;
pub mod redis;

pub use self::memory::{topic_matches, MemoryBus};
pub use self::redis::{mask_redis_url, RedisBus};
