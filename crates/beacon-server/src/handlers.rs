//! HTTP routes and server lifecycle.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tenvis_beacon_auth::TokenValidator;
use tenvis_beacon_bus::{mask_redis_url, MemoryBus, RedisBus};
use tenvis_beacon_core::{
    ConnectionHub, ConnectionInfo, EventBridge, EventPublisher, EventSubscriber,
};
use tenvis_beacon_transport::{serve_websocket, Connection, ConnectionConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The connection registry.
    pub hub: Arc<ConnectionHub>,
    /// Bearer token verification.
    pub validator: Arc<TokenValidator>,
    /// Outbound side of the external transport.
    pub publisher: Arc<dyn EventPublisher>,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create state and start the hub.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        config: Config,
        validator: Arc<TokenValidator>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let hub = ConnectionHub::start(config.hub_config(), Arc::clone(&publisher));
        Self {
            hub,
            validator,
            publisher,
            connection: config.connection_config(),
            config,
        }
    }

    /// Start forwarding externally published events into the hub.
    pub fn spawn_bridge(&self, subscriber: Arc<dyn EventSubscriber>) -> JoinHandle<()> {
        let bridge = EventBridge::new(subscriber, Arc::clone(&self.hub));
        tokio::spawn(async move {
            match bridge.run().await {
                Ok(()) => warn!("Event bridge ended, fan-out stopped"),
                Err(e) => error!(error = %e, "Event bridge failed, fan-out stopped"),
            }
        })
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Connect the external transport: Redis when configured, otherwise an
/// in-process bus.
///
/// # Errors
///
/// Returns an error if Redis is configured but unreachable.
pub async fn connect_bus(
    config: &Config,
) -> Result<(Arc<dyn EventPublisher>, Arc<dyn EventSubscriber>)> {
    match &config.bus.redis_url {
        Some(url) => {
            let bus = Arc::new(
                RedisBus::connect(url)
                    .await
                    .with_context(|| format!("Failed to connect to {}", mask_redis_url(url)))?,
            );
            let publisher: Arc<dyn EventPublisher> = bus.clone();
            let subscriber: Arc<dyn EventSubscriber> = bus;
            Ok((publisher, subscriber))
        }
        None => {
            warn!(
                "No Redis URL configured, running single-node with an in-memory bus"
            );
            let bus = Arc::new(MemoryBus::default());
            let publisher: Arc<dyn EventPublisher> = bus.clone();
            let subscriber: Arc<dyn EventSubscriber> = bus;
            Ok((publisher, subscriber))
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let validator = TokenValidator::initialize(config.validator_config())
        .await
        .context("Failed to fetch signing keys from the issuer")?;

    let (publisher, subscriber) = connect_bus(&config).await?;

    let state = Arc::new(AppState::new(config.clone(), validator, publisher));
    let _bridge = state.spawn_bridge(subscriber);
    let _sampler = metrics::spawn_stats_sampler(&state.hub, metrics::STATS_INTERVAL);

    let app = router(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .into_future();

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    tokio::select! {
        result = server => result.context("Server error")?,
        _ = async {
            let _ = shutdown_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                grace_secs = grace.as_secs(),
                "Grace period elapsed, dropping remaining connections"
            );
        }
    }

    info!("Beacon server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Query parameters of the connection endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
    #[serde(rename = "channelId")]
    pub channel_id: Option<String>,
}

/// Token from the query string, falling back to the `Authorization` header.
fn extract_token(params: &ConnectParams, headers: &HeaderMap) -> Option<String> {
    params
        .token
        .clone()
        .filter(|token| !token.trim().is_empty())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
                .filter(|token| !token.trim().is_empty())
        })
}

/// WebSocket upgrade handler.
///
/// Checks run in order: token present, token valid, channel present, and
/// only then the upgrade itself.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = extract_token(&params, &headers) else {
        metrics::record_rejection("missing_token");
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };

    let claims = match state.validator.validate_token(&token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Rejecting connection");
            metrics::record_rejection(e.reason());
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    let Some(channel_id) = params.channel_id.filter(|id| !id.is_empty()) else {
        metrics::record_rejection("missing_channel");
        return (StatusCode::BAD_REQUEST, "missing channelId")
            .into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            metrics::record_rejection("upgrade");
            return rejection.into_response();
        }
    };

    let info = ConnectionInfo::new(channel_id, claims.user_id(), claims.user_name());
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, info))
}

/// Handle an upgraded WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, info: ConnectionInfo) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    debug!(
        connection = %info.id,
        user = %info.user_id,
        channel = %info.channel_id,
        "WebSocket connected"
    );

    let connection = Connection::new(
        info,
        Arc::clone(&state.hub),
        Arc::clone(&state.publisher),
        state.connection.clone(),
    );
    if let Err(e) = serve_websocket(socket, connection).await {
        debug!(error = %e, "WebSocket ended with error");
    }
}
