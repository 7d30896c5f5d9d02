//! Sharded connection registry and fan-out.
//!
//! The registry is split into a fixed number of buckets chosen by a stable
//! hash of the channel id. Each bucket owns its own lock, its own
//! channel → connection map and a bounded inbox drained by one worker task.
//! No operation ever holds more than one bucket lock, and no lock is held
//! across a publish to the external transport.

use crate::connection::{ChannelId, ConnectionHandle, ConnectionId, ConnectionInfo};
use crate::message::BroadcastMessage;
use crate::pubsub::EventPublisher;
use beacon_protocol::Envelope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, trace, warn};

/// Default number of buckets.
pub const DEFAULT_BUCKETS: usize = 32;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Number of registry buckets.
    pub buckets: usize,
    /// Capacity of each bucket's broadcast inbox.
    pub bucket_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
            bucket_queue_capacity: 1024,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Channels with at least one connection.
    pub channel_count: usize,
    /// Registered connections.
    pub connection_count: usize,
    /// Payloads enqueued onto connection queues.
    pub delivered: u64,
    /// Broadcasts rejected because a bucket inbox was full.
    pub dropped: u64,
    /// Connections evicted by the fan-out path.
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

type Members = HashMap<ConnectionId, ConnectionHandle>;

/// One partition of the registry.
struct Bucket {
    index: usize,
    channels: RwLock<HashMap<ChannelId, Members>>,
}

impl Bucket {
    fn new(index: usize) -> Self {
        Self {
            index,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Offer a payload to every member of the channel.
    ///
    /// Members whose queue is full or whose writer is gone are removed.
    /// Returns the removed members.
    async fn deliver(
        &self,
        message: &BroadcastMessage,
        counters: &Counters,
    ) -> Vec<Arc<ConnectionInfo>> {
        let mut channels = self.channels.write().await;
        let Some(members) = channels.get_mut(&message.channel_id) else {
            trace!(channel = %message.channel_id, "No connections in channel");
            return Vec::new();
        };

        let mut evicted = Vec::new();
        let mut delivered = 0u64;
        members.retain(|_, handle| match handle.try_send(message.payload.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection = %handle.info().id,
                    user = %handle.info().user_id,
                    channel = %message.channel_id,
                    "Outbound queue full, evicting connection"
                );
                evicted.push(Arc::clone(handle.info()));
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    connection = %handle.info().id,
                    channel = %message.channel_id,
                    "Writer gone, removing connection"
                );
                evicted.push(Arc::clone(handle.info()));
                false
            }
        });

        if members.is_empty() {
            channels.remove(&message.channel_id);
            debug!(channel = %message.channel_id, "Deleted empty channel");
        }

        counters.delivered.fetch_add(delivered, Ordering::Relaxed);
        counters
            .evicted
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        trace!(
            channel = %message.channel_id,
            delivered,
            evicted = evicted.len(),
            "Broadcast complete"
        );

        evicted
    }
}

struct Shard {
    bucket: Arc<Bucket>,
    inbox: mpsc::Sender<BroadcastMessage>,
}

/// The central connection registry.
///
/// Cloning is not needed; share it behind an `Arc`. Dropping the last
/// reference stops every bucket worker.
pub struct ConnectionHub {
    shards: Vec<Shard>,
    publisher: Arc<dyn EventPublisher>,
    counters: Arc<Counters>,
    config: HubConfig,
}

impl ConnectionHub {
    /// Create the hub and spawn one worker per bucket.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(config: HubConfig, publisher: Arc<dyn EventPublisher>) -> Arc<Self> {
        info!("Starting connection hub with config: {:?}", config);

        let counters = Arc::new(Counters::default());
        let shards = (0..config.buckets.max(1))
            .map(|index| {
                let bucket = Arc::new(Bucket::new(index));
                let (inbox, rx) = mpsc::channel(config.bucket_queue_capacity.max(1));
                tokio::spawn(run_bucket(
                    Arc::clone(&bucket),
                    rx,
                    Arc::clone(&publisher),
                    Arc::clone(&counters),
                ));
                Shard { bucket, inbox }
            })
            .collect();

        Arc::new(Self {
            shards,
            publisher,
            counters,
            config,
        })
    }

    /// Hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Index of the bucket owning a channel.
    #[must_use]
    pub fn bucket_index(&self, channel_id: &str) -> usize {
        fnv1a(channel_id.as_bytes()) as usize % self.shards.len()
    }

    fn shard(&self, channel_id: &str) -> &Shard {
        &self.shards[self.bucket_index(channel_id)]
    }

    /// Add a connection to its channel and announce `presence:join`.
    ///
    /// The announcement is made after the bucket lock is released.
    pub async fn register(&self, handle: ConnectionHandle) {
        let info = Arc::clone(handle.info());
        let shard = self.shard(&info.channel_id);

        let count = {
            let mut channels = shard.bucket.channels.write().await;
            let members = channels.entry(info.channel_id.clone()).or_insert_with(|| {
                debug!(channel = %info.channel_id, "Creating new channel");
                HashMap::new()
            });
            members.insert(info.id, handle);
            members.len()
        };

        info!(
            connection = %info.id,
            user = %info.user_id,
            channel = %info.channel_id,
            bucket = shard.bucket.index,
            connections = count,
            "Connection registered"
        );

        let envelope = Envelope::presence_join(&info.channel_id, &info.user_id, &info.user_name);
        publish_presence(self.publisher.as_ref(), &envelope).await;
    }

    /// Remove a connection, closing its outbound queue.
    ///
    /// Idempotent. Announces `presence:leave` only when this call removed
    /// the connection; returns whether it did.
    pub async fn unregister(&self, info: &ConnectionInfo) -> bool {
        let shard = self.shard(&info.channel_id);

        let removed = {
            let mut channels = shard.bucket.channels.write().await;
            let (removed, now_empty) = match channels.get_mut(&info.channel_id) {
                Some(members) => (members.remove(&info.id), members.is_empty()),
                None => (None, false),
            };
            if now_empty {
                channels.remove(&info.channel_id);
                debug!(channel = %info.channel_id, "Deleted empty channel");
            }
            removed
        };

        let Some(handle) = removed else {
            trace!(connection = %info.id, "Connection already unregistered");
            return false;
        };
        // Closes the outbound queue; the writer drains it and exits.
        drop(handle);

        info!(
            connection = %info.id,
            user = %info.user_id,
            channel = %info.channel_id,
            "Connection unregistered"
        );

        let envelope = Envelope::presence_leave(&info.channel_id, &info.user_id, &info.user_name);
        publish_presence(self.publisher.as_ref(), &envelope).await;
        true
    }

    /// Queue a message for fan-out to its channel.
    ///
    /// Never waits: when the owning bucket's inbox is full the message is
    /// dropped and `false` is returned.
    pub fn broadcast(&self, message: BroadcastMessage) -> bool {
        let shard = self.shard(&message.channel_id);
        match shard.inbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    channel = %message.channel_id,
                    bucket = shard.bucket.index,
                    "Bucket queue full, dropping broadcast"
                );
                false
            }
            Err(TrySendError::Closed(message)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    channel = %message.channel_id,
                    bucket = shard.bucket.index,
                    "Bucket worker stopped, dropping broadcast"
                );
                false
            }
        }
    }

    /// Snapshot of the user IDs currently in a channel.
    pub async fn list_channel_users(&self, channel_id: &str) -> Vec<String> {
        let channels = self.shard(channel_id).bucket.channels.read().await;
        let Some(members) = channels.get(channel_id) else {
            return Vec::new();
        };
        members
            .values()
            .map(|handle| handle.info().user_id.clone())
            .collect()
    }

    /// Check if a channel has any connections.
    pub async fn channel_exists(&self, channel_id: &str) -> bool {
        self.shard(channel_id)
            .bucket
            .channels
            .read()
            .await
            .contains_key(channel_id)
    }

    /// Get hub statistics.
    ///
    /// Buckets are visited one at a time, so the counts are not a single
    /// consistent snapshot.
    pub async fn stats(&self) -> HubStats {
        let mut stats = HubStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            ..HubStats::default()
        };
        for shard in &self.shards {
            let channels = shard.bucket.channels.read().await;
            stats.channel_count += channels.len();
            let members: usize = channels.values().map(HashMap::len).sum();
            stats.connection_count += members;
        }
        stats
    }
}

/// Bucket worker: drains the inbox in FIFO order.
async fn run_bucket(
    bucket: Arc<Bucket>,
    mut inbox: mpsc::Receiver<BroadcastMessage>,
    publisher: Arc<dyn EventPublisher>,
    counters: Arc<Counters>,
) {
    trace!(bucket = bucket.index, "Bucket worker started");

    while let Some(message) = inbox.recv().await {
        let evicted = bucket.deliver(&message, &counters).await;

        // Eviction is the removal transition for these connections, so the
        // leave is announced here; a later unregister is a no-op.
        for info in evicted {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move {
                let envelope =
                    Envelope::presence_leave(&info.channel_id, &info.user_id, &info.user_name);
                publish_presence(publisher.as_ref(), &envelope).await;
            });
        }
    }

    trace!(bucket = bucket.index, "Bucket worker stopped");
}

async fn publish_presence(publisher: &dyn EventPublisher, envelope: &Envelope) {
    match publisher.publish(envelope).await {
        Ok(()) => debug!(
            event = %envelope.event_type,
            channel = %envelope.channel_id,
            "Published presence event"
        ),
        Err(e) => error!(
            event = %envelope.event_type,
            channel = %envelope.channel_id,
            error = %e,
            "Failed to publish presence event"
        ),
    }
}

/// 32-bit FNV-1a.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
