//! # beacon-server
//!
//! HTTP surface and process lifecycle of the Beacon broker: configuration,
//! the `/ws` connection endpoint, `/health`, metrics export and graceful
//! shutdown.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{connect_bus, router, run_server, AppState};
