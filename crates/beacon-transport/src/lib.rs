//! # beacon-transport
//!
//! Socket handling for Beacon clients.
//!
//! A [`Connection`] pumps [`Frame`]s between the hub and one socket. The
//! pumps are written against `Stream`/`Sink` of frames, so they run the
//! same over a WebSocket or an in-memory channel.
//!
//! ```rust,ignore
//! use tenvis_beacon_transport::{serve_websocket, Connection, ConnectionConfig};
//!
//! ws.on_upgrade(move |socket| async move {
//!     let connection = Connection::new(info, hub, publisher, ConnectionConfig::default());
//!     let _ = serve_websocket(socket, connection).await;
//! })
//! ```

pub mod connection;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::{Connection, ConnectionConfig, CLIENT_MESSAGES_TOTAL};
pub use traits::{Frame, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::serve_websocket;
