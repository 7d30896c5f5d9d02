//! End-to-end tests over a real listener.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tenvis_beacon_auth::testing::{StaticKeySource, TestIssuer, TEST_ISSUER};
use tenvis_beacon_auth::{TokenValidator, ValidatorConfig};
use tenvis_beacon_bus::MemoryBus;
use tenvis_beacon_core::{BusStream, EventPublisher, EventSubscriber};
use tenvis_beacon_server::{router, AppState, Config};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    bus: Arc<MemoryBus>,
    issuer: TestIssuer,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = Config::default();
        config.auth.issuer_url = TEST_ISSUER.to_string();
        config.bus.redis_url = None;

        let issuer = TestIssuer::new();
        let source = Arc::new(StaticKeySource::new(issuer.jwk_set()));
        let validator =
            TokenValidator::initialize_with_source(ValidatorConfig::new(TEST_ISSUER), source)
                .await
                .unwrap();

        let bus = Arc::new(MemoryBus::default());
        let publisher: Arc<dyn EventPublisher> = bus.clone();
        let subscriber: Arc<dyn EventSubscriber> = bus.clone();
        let state = Arc::new(AppState::new(config, validator, publisher));
        state.spawn_bridge(subscriber);

        // the bridge must be subscribed before anything is published
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self { addr, bus, issuer }
    }

    fn url(&self, query: &str) -> String {
        format!("ws://{}/ws?{}", self.addr, query)
    }

    async fn connect(&self, user_id: &str, user_name: &str, channel: &str) -> Client {
        let token = self.issuer.token(user_id, user_name);
        let url = self.url(&format!("token={token}&channelId={channel}"));
        let (client, response) = connect_async(url).await.unwrap();
        assert_eq!(response.status().as_u16(), 101);
        client
    }

    async fn rejection_status(&self, query: &str) -> u16 {
        match connect_async(self.url(query)).await {
            Err(WsError::Http(response)) => response.status().as_u16(),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("connection was accepted"),
        }
    }

    async fn events(&self) -> BusStream {
        self.bus.psubscribe("channel:*").await.unwrap()
    }
}

/// Next text frame, skipping control frames.
async fn next_text(client: &mut Client) -> String {
    loop {
        let message = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended")
            .expect("read failed");
        if let Message::Text(text) = message {
            return text;
        }
    }
}

async fn next_json(client: &mut Client) -> Value {
    serde_json::from_str(&next_text(client).await).unwrap()
}

/// Wait until `client` sees its own presence:join.
async fn await_own_join(client: &mut Client, user_id: &str) {
    loop {
        let event = next_json(client).await;
        if event["type"] == "presence:join" && event["data"]["userId"] == user_id {
            return;
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let quiet = Duration::from_millis(200);
    match timeout(quiet, client.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        Ok(other) => panic!("expected no message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let body: Value = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_fanout_reaches_only_the_addressed_channel() {
    let server = TestServer::start().await;

    let mut ann = server.connect("u1", "Ann", "c1").await;
    await_own_join(&mut ann, "u1").await;
    let mut bo = server.connect("u2", "Bo", "c1").await;
    await_own_join(&mut bo, "u2").await;
    let mut cy = server.connect("u3", "Cy", "c2").await;
    await_own_join(&mut cy, "u3").await;

    // Ann also saw Bo join
    let bo_join = next_json(&mut ann).await;
    assert_eq!(bo_join["type"], "presence:join");
    assert_eq!(bo_join["data"]["userName"], "Bo");

    let raw = concat!(
        r#"{"type":"message:created","channelId":"c1","#,
        r#""timestamp":1700000000,"data":{"id":"m1"}}"#
    );
    let payload = raw.as_bytes().to_vec();
    let receivers = server.bus.publish_raw("channel:c1", payload);
    assert_eq!(receivers, 1);

    assert_eq!(next_text(&mut ann).await, raw);
    assert_eq!(next_text(&mut bo).await, raw);
    assert_silent(&mut cy).await;
}

#[tokio::test]
async fn test_typing_is_republished_to_channel_topic() {
    let server = TestServer::start().await;
    let mut events = server.events().await;

    let mut ann = server.connect("u1", "Ann", "c1").await;
    await_own_join(&mut ann, "u1").await;

    ann.send(Message::Text(
        r#"{"type":"typing:start","data":{"threadId":"t1"}}"#.to_string(),
    ))
    .await
    .unwrap();

    let typing = loop {
        let message = timeout(WAIT, events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let event: Value = serde_json::from_slice(&message.payload).unwrap();
        if event["type"] == "typing:start" {
            assert_eq!(message.topic, "channel:c1");
            break event;
        }
    };
    assert_eq!(typing["channelId"], "c1");
    assert_eq!(typing["data"]["userId"], "u1");
    assert_eq!(typing["data"]["userName"], "Ann");
    assert_eq!(typing["data"]["threadId"], "t1");

    // and it comes back through the bridge
    let echoed = next_json(&mut ann).await;
    assert_eq!(echoed["type"], "typing:start");
}

#[tokio::test]
async fn test_disconnect_publishes_leave() {
    let server = TestServer::start().await;
    let mut events = server.events().await;

    let mut ann = server.connect("u1", "Ann", "c1").await;
    await_own_join(&mut ann, "u1").await;
    ann.close(None).await.unwrap();

    let leave = loop {
        let message = timeout(WAIT, events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let event: Value = serde_json::from_slice(&message.payload).unwrap();
        if event["type"] == "presence:leave" {
            break event;
        }
    };
    assert_eq!(leave["data"]["userId"], "u1");
    assert_eq!(leave["data"]["userName"], "Ann");
}

#[tokio::test]
async fn test_token_from_authorization_header() {
    let server = TestServer::start().await;
    let token = server.issuer.token("u1", "Ann");

    let mut request = server.url("channelId=c1").into_client_request().unwrap();
    let bearer = format!("Bearer {token}").parse().unwrap();
    request.headers_mut().insert("Authorization", bearer);

    let (mut client, _) = connect_async(request).await.unwrap();
    await_own_join(&mut client, "u1").await;
}

#[tokio::test]
async fn test_handshake_rejections() {
    let server = TestServer::start().await;
    let valid = server.issuer.token("u1", "Ann");
    let foreign = TestIssuer::with_issuer("https://elsewhere.test");
    let foreign = foreign.token("u1", "Ann");

    assert_eq!(server.rejection_status("channelId=c1").await, 401);
    let status = server.rejection_status("token=garbage&channelId=c1").await;
    assert_eq!(status, 401);
    assert_eq!(
        server
            .rejection_status(&format!("token={foreign}&channelId=c1"))
            .await,
        401
    );
    // token is checked before the channel
    assert_eq!(server.rejection_status("token=garbage").await, 401);
    let status = server.rejection_status(&format!("token={valid}")).await;
    assert_eq!(status, 400);
    assert_eq!(
        server
            .rejection_status(&format!("token={valid}&channelId="))
            .await,
        400
    );
}

#[tokio::test]
async fn test_plain_http_request_is_not_upgraded() {
    let server = TestServer::start().await;
    let token = server.issuer.token("u1", "Ann");

    let status = reqwest::get(format!(
        "http://{}/ws?token={token}&channelId=c1",
        server.addr
    ))
    .await
    .unwrap()
    .status();

    assert!(status.is_client_error());
    assert_ne!(status.as_u16(), 401);
}
