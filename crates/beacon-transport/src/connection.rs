//! Per-client protocol loop.
//!
//! A connection runs two pumps over one socket:
//!
//! - the **reader** runs inline, enforces the read deadline (extended by
//!   every pong) and republishes client-reported activity;
//! - the **writer** runs as its own task, drains the outbound queue and
//!   sends a ping every `ping_period`.
//!
//! Whichever pump stops first tears the connection down. The reader then
//! unregisters from the hub exactly once, which closes the outbound queue
//! and lets the writer send a close frame and exit.

use beacon_protocol::{ClientEvent, Envelope};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tenvis_beacon_core::{ConnectionHandle, ConnectionHub, ConnectionInfo, EventPublisher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::traits::{Frame, TransportError};

/// Counter of client messages, labelled by type.
pub const CLIENT_MESSAGES_TOTAL: &str = "beacon_client_messages_total";

/// Heartbeat and queue settings of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Read deadline, extended by every pong.
    pub pong_wait: Duration,
    /// Ping interval. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Deadline for a single write.
    pub write_wait: Duration,
    /// Outbound queue capacity.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::with_pong_wait(Duration::from_secs(60))
    }
}

impl ConnectionConfig {
    /// Defaults with the given read deadline; pings at 90% of it.
    #[must_use]
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            outbound_capacity: 256,
        }
    }
}

/// One authenticated client bound to one channel.
pub struct Connection {
    info: Arc<ConnectionInfo>,
    hub: Arc<ConnectionHub>,
    publisher: Arc<dyn EventPublisher>,
    config: ConnectionConfig,
}

impl Connection {
    /// Describe a connection. Nothing is registered until [`run`](Self::run).
    #[must_use]
    pub fn new(
        info: ConnectionInfo,
        hub: Arc<ConnectionHub>,
        publisher: Arc<dyn EventPublisher>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            info: Arc::new(info),
            hub,
            publisher,
            config,
        }
    }

    /// Connection facts.
    #[must_use]
    pub fn info(&self) -> &Arc<ConnectionInfo> {
        &self.info
    }

    /// Register with the hub and pump frames until either side stops.
    ///
    /// Returns `Ok` when the peer closed the connection and the error that
    /// ended it otherwise. The connection is unregistered in every case.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if the read deadline lapsed,
    /// [`TransportError::ReceiveFailed`] on a read error, and the writer's
    /// error if a write failed first.
    pub async fn run<S, K, E>(self, mut stream: S, sink: K) -> Result<(), TransportError>
    where
        S: Stream<Item = Result<Frame, E>> + Unpin + Send,
        E: Display,
        K: Sink<Frame> + Unpin + Send + 'static,
        K::Error: Display,
    {
        let (handle, outbound) = ConnectionHandle::new(
            Arc::clone(&self.info),
            self.config.outbound_capacity,
        );
        self.hub.register(handle).await;

        let mut writer = tokio::spawn(write_pump(
            outbound,
            sink,
            self.config.clone(),
            Arc::clone(&self.info),
        ));

        let (result, writer_done) = self.read_pump(&mut stream, &mut writer).await;

        self.hub.unregister(&self.info).await;

        if !writer_done {
            match timeout(self.config.write_wait, &mut writer).await {
                Ok(Ok(Err(e))) => debug!(connection = %self.info.id, error = %e, "Writer stopped"),
                Ok(_) => {}
                Err(_) => {
                    warn!(connection = %self.info.id, "Writer did not stop in time, aborting");
                    writer.abort();
                }
            }
        }

        info!(
            connection = %self.info.id,
            channel = %self.info.channel_id,
            result = ?result,
            "Connection closed"
        );
        result
    }

    /// Read until the socket fails, the deadline lapses or the writer stops.
    ///
    /// Returns the outcome and whether the writer has already completed.
    async fn read_pump<S, E>(
        &self,
        stream: &mut S,
        writer: &mut JoinHandle<Result<(), TransportError>>,
    ) -> (Result<(), TransportError>, bool)
    where
        S: Stream<Item = Result<Frame, E>> + Unpin + Send,
        E: Display,
    {
        let id = self.info.id;
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            tokio::select! {
                biased;

                joined = &mut *writer => {
                    let result = match joined {
                        Ok(result) => result,
                        Err(e) => {
                            let reason = format!("writer task failed: {e}");
                            Err(TransportError::SendFailed(reason))
                        }
                    };
                    debug!(connection = %id, "Writer stopped, closing reader");
                    return (result, true);
                }

                next = timeout_at(deadline, stream.next()) => match next {
                    Err(_) => {
                        debug!(connection = %id, "Read deadline expired");
                        return (Err(TransportError::Timeout), false);
                    }
                    Ok(None) => {
                        debug!(connection = %id, "Socket stream ended");
                        return (Ok(()), false);
                    }
                    Ok(Some(Err(e))) => {
                        debug!(connection = %id, error = %e, "Read failed");
                        return (Err(TransportError::ReceiveFailed(e.to_string())), false);
                    }
                    Ok(Some(Ok(frame))) => match frame {
                        Frame::Pong(_) => {
                            trace!(connection = %id, "Pong received");
                            deadline = Instant::now() + self.config.pong_wait;
                        }
                        Frame::Ping(_) => trace!(connection = %id, "Ping received"),
                        Frame::Text(data) | Frame::Binary(data) => {
                            self.handle_client_message(&data).await;
                        }
                        Frame::Close => {
                            debug!(connection = %id, "Received close frame");
                            return (Ok(()), false);
                        }
                    },
                },
            }
        }
    }

    /// Republish client-reported activity. Never fails the connection.
    async fn handle_client_message(&self, data: &[u8]) {
        let info = &self.info;
        let event = match ClientEvent::parse(data) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    connection = %info.id,
                    size = data.len(),
                    error = %e,
                    "Discarding malformed client message"
                );
                metrics::counter!(CLIENT_MESSAGES_TOTAL, "type" => "malformed").increment(1);
                return;
            }
        };

        let envelope = match &event {
            ClientEvent::TypingStart { thread_id } => Envelope::typing_start(
                &info.channel_id,
                &info.user_id,
                &info.user_name,
                thread_id.as_deref(),
            ),
            ClientEvent::TypingStop { thread_id } => Envelope::typing_stop(
                &info.channel_id,
                &info.user_id,
                &info.user_name,
                thread_id.as_deref(),
            ),
            ClientEvent::Unknown(kind) => {
                debug!(connection = %info.id, kind = %kind, "Ignoring unrecognized client message");
                metrics::counter!(CLIENT_MESSAGES_TOTAL, "type" => "unknown").increment(1);
                return;
            }
        };
        let kind = envelope.event_type.as_str();
        metrics::counter!(CLIENT_MESSAGES_TOTAL, "type" => kind).increment(1);

        if let Err(e) = self.publisher.publish(&envelope).await {
            warn!(
                connection = %info.id,
                event = %envelope.event_type,
                error = %e,
                "Failed to republish client event"
            );
        }
    }
}

/// Drain the outbound queue and ping until the queue closes or a write fails.
async fn write_pump<K>(
    mut outbound: mpsc::Receiver<Bytes>,
    mut sink: K,
    config: ConnectionConfig,
    info: Arc<ConnectionInfo>,
) -> Result<(), TransportError>
where
    K: Sink<Frame> + Unpin + Send,
    K::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(payload) => {
                    send_frame(&mut sink, Frame::Text(payload), config.write_wait).await?;
                }
                None => {
                    debug!(connection = %info.id, "Outbound queue closed, sending close frame");
                    let _ = send_frame(&mut sink, Frame::Close, config.write_wait).await;
                    let _ = timeout(config.write_wait, sink.close()).await;
                    return Ok(());
                }
            },
            _ = ticker.tick() => {
                trace!(connection = %info.id, "Sending ping");
                send_frame(&mut sink, Frame::Ping(Bytes::new()), config.write_wait).await?;
            }
        }
    }
}

async fn send_frame<K>(
    sink: &mut K,
    frame: Frame,
    write_wait: Duration,
) -> Result<(), TransportError>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::SendFailed(e.to_string())),
        Err(_) => Err(TransportError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::{codec, EventType, TypingData};
    use futures::channel::mpsc as fmpsc;
    use tenvis_beacon_bus::MemoryBus;
    use tenvis_beacon_core::{BroadcastMessage, BusStream, EventSubscriber, HubConfig};

    type ClientTx = fmpsc::UnboundedSender<Result<Frame, TransportError>>;
    type ClientRx = fmpsc::UnboundedReceiver<Result<Frame, TransportError>>;

    struct Harness {
        hub: Arc<ConnectionHub>,
        bus: Arc<MemoryBus>,
        events: BusStream,
    }

    impl Harness {
        async fn new() -> Self {
            let bus = Arc::new(MemoryBus::default());
            let events = bus.psubscribe("channel:*").await.unwrap();
            let hub = ConnectionHub::start(HubConfig::default(), bus.clone());
            Self { hub, bus, events }
        }

        fn connection(&self, config: ConnectionConfig) -> Connection {
            Connection::new(
                ConnectionInfo::new("c1", "u1", "Ann"),
                Arc::clone(&self.hub),
                self.bus.clone(),
                config,
            )
        }

        async fn next_event(&mut self) -> Envelope {
            let message = self.events.next().await.unwrap().unwrap();
            codec::decode(&message.payload).unwrap()
        }
    }

    type ServerTx = fmpsc::UnboundedSender<Frame>;
    type ServerRx = fmpsc::UnboundedReceiver<Frame>;

    fn socket() -> (ClientTx, ClientRx, ServerTx, ServerRx) {
        let (client_tx, client_rx) = fmpsc::unbounded();
        let (server_tx, server_rx) = fmpsc::unbounded();
        (client_tx, client_rx, server_tx, server_rx)
    }

    fn text(json: &str) -> Result<Frame, TransportError> {
        Ok(Frame::Text(Bytes::copy_from_slice(json.as_bytes())))
    }

    #[test]
    fn test_default_ping_period_is_ninety_percent() {
        let config = ConnectionConfig::default();
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.ping_period, Duration::from_secs(54));
        assert!(config.ping_period < config.pong_wait);
    }

    #[tokio::test]
    async fn test_delivers_fanout_and_closes_on_peer_close() {
        let mut harness = Harness::new().await;
        let (client_tx, client_rx, server_tx, mut server_rx) = socket();
        let connection = harness.connection(ConnectionConfig::default());
        let info = Arc::clone(connection.info());
        let task = tokio::spawn(connection.run(client_rx, server_tx));

        let join = harness.next_event().await;
        assert_eq!(join.event_type, EventType::PresenceJoin);
        assert!(harness.hub.channel_exists("c1").await);

        let raw = br#"{"type":"message:created","channelId":"c1","data":{"id":"m1"}}"#;
        let raw = Bytes::from_static(raw);
        let message = BroadcastMessage::new("c1", raw.clone());
        assert!(harness.hub.broadcast(message));
        assert_eq!(server_rx.next().await, Some(Frame::Text(raw)));

        client_tx.unbounded_send(Ok(Frame::Close)).unwrap();
        assert_eq!(task.await.unwrap(), Ok(()));

        assert_eq!(server_rx.next().await, Some(Frame::Close));
        assert_eq!(server_rx.next().await, None);
        assert!(!harness.hub.channel_exists("c1").await);
        assert!(!harness.hub.unregister(&info).await);

        let leave = harness.next_event().await;
        assert_eq!(leave.event_type, EventType::PresenceLeave);
        assert_eq!(leave.data["userName"], "Ann");
    }

    #[tokio::test]
    async fn test_typing_is_republished() {
        let mut harness = Harness::new().await;
        let (client_tx, client_rx, server_tx, _server_rx) = socket();
        let task = tokio::spawn(
            harness
                .connection(ConnectionConfig::default())
                .run(client_rx, server_tx),
        );
        let join = harness.next_event().await;
        assert_eq!(join.event_type, EventType::PresenceJoin);

        client_tx.unbounded_send(text("not json")).unwrap();
        client_tx
            .unbounded_send(text(r#"{"type":"reaction:add"}"#))
            .unwrap();
        client_tx
            .unbounded_send(text(r#"{"type":"typing:start","data":{"threadId":"t1"}}"#))
            .unwrap();
        let stop = Bytes::from_static(br#"{"type":"typing:stop"}"#);
        client_tx.unbounded_send(Ok(Frame::Binary(stop))).unwrap();

        let start = harness.next_event().await;
        assert_eq!(start.event_type, EventType::TypingStart);
        assert_eq!(start.channel_id, "c1");
        let data: TypingData = start.data_as().unwrap();
        assert_eq!(data.user_id, "u1");
        assert_eq!(data.user_name, "Ann");
        assert_eq!(data.thread_id.as_deref(), Some("t1"));

        let stop = harness.next_event().await;
        assert_eq!(stop.event_type, EventType::TypingStop);
        assert!(stop.data.get("threadId").is_none());

        drop(client_tx);
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_without_pong() {
        let harness = Harness::new().await;
        let (_client_tx, client_rx, server_tx, mut server_rx) = socket();
        let start = Instant::now();

        let result = harness
            .connection(ConnectionConfig::default())
            .run(client_rx, server_tx)
            .await;

        assert_eq!(result, Err(TransportError::Timeout));
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(server_rx.next().await, Some(Frame::Ping(Bytes::new())));
        assert_eq!(server_rx.next().await, Some(Frame::Close));
        assert!(!harness.hub.channel_exists("c1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_extends_deadline() {
        let harness = Harness::new().await;
        let (client_tx, client_rx, server_tx, mut server_rx) = socket();
        let task = tokio::spawn(
            harness
                .connection(ConnectionConfig::default())
                .run(client_rx, server_tx),
        );

        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(server_rx.next().await, Some(Frame::Ping(Bytes::new())));
        client_tx
            .unbounded_send(Ok(Frame::Pong(Bytes::new())))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(harness.hub.channel_exists("c1").await);

        let start = Instant::now();
        assert_eq!(task.await.unwrap(), Err(TransportError::Timeout));
        // deadline was reset at t=55s
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_hub_removal_closes_connection() {
        let mut harness = Harness::new().await;
        let (_client_tx, client_rx, server_tx, mut server_rx) = socket();
        let connection = harness.connection(ConnectionConfig::default());
        let info = Arc::clone(connection.info());
        let task = tokio::spawn(connection.run(client_rx, server_tx));
        let join = harness.next_event().await;
        assert_eq!(join.event_type, EventType::PresenceJoin);

        // same path as an eviction: the queue closes underneath the writer
        assert!(harness.hub.unregister(&info).await);

        assert_eq!(server_rx.next().await, Some(Frame::Close));
        assert_eq!(task.await.unwrap(), Ok(()));
        let leave = harness.next_event().await;
        assert_eq!(leave.event_type, EventType::PresenceLeave);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), harness.events.next())
                .await
                .is_err(),
            "presence:leave must be published once"
        );
    }

    #[tokio::test]
    async fn test_write_failure_ends_connection() {
        let harness = Harness::new().await;
        let (_client_tx, client_rx, server_tx, server_rx) = socket();
        drop(server_rx);

        let task = tokio::spawn(
            harness
                .connection(ConnectionConfig::default())
                .run(client_rx, server_tx),
        );
        while !harness.hub.channel_exists("c1").await {
            tokio::task::yield_now().await;
        }
        harness
            .hub
            .broadcast(BroadcastMessage::new("c1", Bytes::from_static(b"{}")));

        assert!(matches!(
            task.await.unwrap(),
            Err(TransportError::SendFailed(_))
        ));
        assert!(!harness.hub.channel_exists("c1").await);
    }
}
