//! Server configuration.
//!
//! Configuration is layered:
//! - built-in defaults, some read from the legacy environment names
//!   (`PORT`, `REDIS_URL`, `KINDE_ISSUER_URL` / `ISSUER_URL`, `LOG_LEVEL`)
//! - a TOML file (`beacon.toml`, `/etc/beacon/beacon.toml`,
//!   `~/.config/beacon/beacon.toml`, or `BEACON_CONFIG`)
//! - `BEACON_*` environment variables, `__` separating sections
//!   (`BEACON_AUTH__ISSUER_URL`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tenvis_beacon_auth::ValidatorConfig;
use tenvis_beacon_core::HubConfig;
use tenvis_beacon_transport::ConnectionConfig;

/// Default search paths for the configuration file.
const CONFIG_PATHS: [&str; 3] = [
    "beacon.toml",
    "/etc/beacon/beacon.toml",
    "~/.config/beacon/beacon.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on shutdown after a signal, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum client message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Read deadline, extended by every pong.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Ping interval; 90% of `pong_wait_ms` when unset.
    #[serde(default)]
    pub ping_period_ms: Option<u64>,

    /// Deadline for a single write.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,
}

/// Connection hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    #[serde(default = "default_buckets")]
    pub buckets: usize,

    #[serde(default = "default_bucket_queue_capacity")]
    pub bucket_queue_capacity: usize,

    /// Capacity of each connection's outbound queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

/// Token verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token issuer; keys are fetched from its well-known endpoint.
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,

    /// Required audience, if any.
    #[serde(default)]
    pub audience: Option<String>,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

/// External pub/sub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Redis URL. Without one the broker runs single-node on an
    /// in-memory bus.
    #[serde(default = "default_redis_url")]
    pub redis_url: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    512 * 1024
}

fn default_pong_wait() -> u64 {
    60_000
}

fn default_write_wait() -> u64 {
    10_000
}

fn default_buckets() -> usize {
    tenvis_beacon_core::hub::DEFAULT_BUCKETS
}

fn default_bucket_queue_capacity() -> usize {
    1024
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_issuer_url() -> String {
    std::env::var("KINDE_ISSUER_URL")
        .or_else(|_| std::env::var("ISSUER_URL"))
        .unwrap_or_default()
}

fn default_refresh_interval() -> u64 {
    24 * 60 * 60
}

fn default_redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty())
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            shutdown_grace_secs: default_shutdown_grace(),
            transport: TransportConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            hub: HubSettings::default(),
            auth: AuthConfig::default(),
            bus: BusConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: default_pong_wait(),
            ping_period_ms: None,
            write_wait_ms: default_write_wait(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            buckets: default_buckets(),
            bucket_queue_capacity: default_bucket_queue_capacity(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer_url: default_issuer_url(),
            audience: None,
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl HeartbeatConfig {
    /// Read deadline.
    #[must_use]
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Ping interval.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        self.ping_period_ms
            .map_or_else(|| self.pong_wait() * 9 / 10, Duration::from_millis)
    }
}

impl Config {
    /// Load from the first configuration file found, then apply
    /// `BEACON_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = std::env::var("BEACON_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(find_config_file);
        Self::load_from(path.as_deref())
    }

    /// Load from `path` (if any) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("BEACON")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let source = match path {
            Some(path) => path.display().to_string(),
            None => "environment".to_string(),
        };
        builder
            .build()
            .and_then(|settings| settings.try_deserialize::<Config>())
            .with_context(|| format!("Failed to load configuration from {source}"))
    }

    /// Load configuration from a specific file, without overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Reject settings the broker cannot run with.
    ///
    /// # Errors
    ///
    /// Describes the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.auth.issuer_url.trim().is_empty() {
            bail!("auth.issuer_url is required (or set KINDE_ISSUER_URL)");
        }
        if self.hub.buckets == 0 {
            bail!("hub.buckets must be at least 1");
        }
        if self.hub.bucket_queue_capacity == 0 || self.hub.outbound_capacity == 0 {
            bail!("hub queue capacities must be at least 1");
        }
        if self.heartbeat.ping_period() >= self.heartbeat.pong_wait() {
            bail!(
                "heartbeat.ping_period_ms ({:?}) must be shorter than pong_wait_ms ({:?})",
                self.heartbeat.ping_period(),
                self.heartbeat.pong_wait()
            );
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!("transport.websocket_path must start with '/'");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form an address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    /// Tracing filter used when `RUST_LOG` is unset.
    #[must_use]
    pub fn log_filter(&self) -> String {
        let level = &self.log_level;
        [
            "beacon",
            "tenvis_beacon_server",
            "tenvis_beacon_core",
            "tenvis_beacon_auth",
            "tenvis_beacon_bus",
            "tenvis_beacon_transport",
            "tower_http",
        ]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            buckets: self.hub.buckets,
            bucket_queue_capacity: self.hub.bucket_queue_capacity,
        }
    }

    /// Per-connection settings.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            pong_wait: self.heartbeat.pong_wait(),
            ping_period: self.heartbeat.ping_period(),
            write_wait: Duration::from_millis(self.heartbeat.write_wait_ms),
            outbound_capacity: self.hub.outbound_capacity,
        }
    }

    /// Token validator settings.
    #[must_use]
    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            issuer: self.auth.issuer_url.clone(),
            audience: self.auth.audience.clone(),
            refresh_interval: Duration::from_secs(self.auth.refresh_interval_secs),
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}
