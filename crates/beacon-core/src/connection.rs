//! Connection identity and outbound queue.
//!
//! A [`ConnectionHandle`] owns the only sender of a connection's outbound
//! queue. The hub keeps that handle inside its channel entry, so removing
//! the entry is what closes the queue and the writer loop observes it.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A channel identifier.
pub type ChannelId = String;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric ID.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// Immutable facts about a connection, fixed at handshake time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: ConnectionId,
    /// The single channel this connection belongs to.
    pub channel_id: ChannelId,
    /// Authenticated user ID (token subject).
    pub user_id: String,
    /// Display name (token given name).
    pub user_name: String,
}

impl ConnectionInfo {
    /// Describe a new connection with a freshly allocated ID.
    #[must_use]
    pub fn new(
        channel_id: impl Into<ChannelId>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }
}

/// Registry-side handle of a connection.
///
/// Deliberately not `Clone`: dropping it closes the outbound queue.
#[derive(Debug)]
pub struct ConnectionHandle {
    info: Arc<ConnectionInfo>,
    sender: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its bounded outbound queue.
    #[must_use]
    pub fn new(info: Arc<ConnectionInfo>, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { info, sender }, receiver)
    }

    /// Connection facts.
    #[must_use]
    pub fn info(&self) -> &Arc<ConnectionInfo> {
        &self.info
    }

    /// Enqueue without waiting.
    pub(crate) fn try_send(&self, payload: Bytes) -> Result<(), TrySendError<Bytes>> {
        self.sender.try_send(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_queue() {
        let info = Arc::new(ConnectionInfo::new("c1", "u1", "Ann"));
        let (handle, mut rx) = ConnectionHandle::new(info, 2);

        handle.try_send(Bytes::from_static(b"one")).unwrap();
        drop(handle);

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_full_queue_reports_full() {
        let info = Arc::new(ConnectionInfo::new("c1", "u1", "Ann"));
        let (handle, _rx) = ConnectionHandle::new(info, 1);

        handle.try_send(Bytes::from_static(b"one")).unwrap();
        assert!(matches!(
            handle.try_send(Bytes::from_static(b"two")),
            Err(TrySendError::Full(_))
        ));
    }
}
