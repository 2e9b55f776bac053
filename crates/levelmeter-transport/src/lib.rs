//! Event-stream connection manager.
//!
//! This crate owns the single long-lived websocket connection to a level
//! telemetry source, performs the per-device subscribe handshake and
//! surfaces connection lifecycle events to the engine.

mod connection;
mod error;
mod websocket;

pub use connection::{CloseInitiator, ConnectionEvent, ConnectionId};
pub use error::TransportError;
pub use levelmeter_ipc::ConnectionState;
pub use websocket::{subscribe_directive, StreamConnection};

/// Channel capacity for connection events (transport → engine).
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Prefix of the directive that subscribes to a device's levels.
pub const SUBSCRIBE_LEVELS_CMD: &str = "subscribe levels";

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
