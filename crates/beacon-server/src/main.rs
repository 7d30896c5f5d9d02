//! # Beacon Server
//!
//! Real-time fan-out broker for chat channels.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file in a default location
//! beacon
//!
//! # Run with a specific config file
//! BEACON_CONFIG=/path/to/beacon.toml beacon
//!
//! # Run with environment variables
//! KINDE_ISSUER_URL=https://tenant.kinde.com REDIS_URL=redis://localhost:6379 beacon
//! BEACON_PORT=8080 BEACON_HUB__BUCKETS=64 beacon
//! ```

use anyhow::Result;
use tenvis_beacon_server::{config::Config, metrics, run_server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    run_server(config).await?;

    Ok(())
}
