//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tenvis_beacon_core::{ConnectionHub, HubStats};
use tokio::task::JoinHandle;
use tracing::{info, trace};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const HANDSHAKE_REJECTIONS_TOTAL: &str = "beacon_handshake_rejections_total";
    pub const CLIENT_MESSAGES_TOTAL: &str = tenvis_beacon_transport::CLIENT_MESSAGES_TOTAL;
    pub const CHANNELS_ACTIVE: &str = "beacon_channels_active";
    pub const HUB_CONNECTIONS: &str = "beacon_hub_connections";
    pub const MESSAGES_DELIVERED_TOTAL: &str = "beacon_messages_delivered_total";
    pub const BROADCASTS_DROPPED_TOTAL: &str = "beacon_broadcasts_dropped_total";
    pub const CONNECTIONS_EVICTED_TOTAL: &str = "beacon_connections_evicted_total";
}

/// How often hub statistics are sampled.
pub const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::HANDSHAKE_REJECTIONS_TOTAL,
        "Connection attempts rejected before upgrade, by reason"
    );
    metrics::describe_counter!(
        names::CLIENT_MESSAGES_TOTAL,
        "Messages received from clients, by type"
    );
    metrics::describe_gauge!(
        names::CHANNELS_ACTIVE,
        "Channels with at least one connection"
    );
    metrics::describe_gauge!(names::HUB_CONNECTIONS, "Connections registered in the hub");
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED_TOTAL,
        "Payloads queued to connections"
    );
    metrics::describe_counter!(
        names::BROADCASTS_DROPPED_TOTAL,
        "Broadcasts dropped because a bucket queue was full"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_EVICTED_TOTAL,
        "Slow connections evicted by the hub"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a handshake rejected before upgrade.
pub fn record_rejection(reason: &'static str) {
    counter!(names::HANDSHAKE_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Publish a hub statistics sample.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::CHANNELS_ACTIVE)
        .set(stats.channel_count as f64);
    gauge!(names::HUB_CONNECTIONS)
        .set(stats.connection_count as f64);
    counter!(names::MESSAGES_DELIVERED_TOTAL)
        .absolute(stats.delivered);
    counter!(names::BROADCASTS_DROPPED_TOTAL)
        .absolute(stats.dropped);
    counter!(names::CONNECTIONS_EVICTED_TOTAL)
        .absolute(stats.evicted);
}

/// Sample hub statistics every `interval` until the hub is dropped.
pub fn spawn_stats_sampler(hub: &Arc<ConnectionHub>, interval: Duration) -> JoinHandle<()> {
    let hub = Arc::downgrade(hub);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(hub) = hub.upgrade() else {
                break;
            };
            let stats = hub.stats().await;
            trace!(?stats, "Hub stats sampled");
            record_hub_stats(&stats);
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
