//! Connection state machine types.

use serde::{Deserialize, Serialize};

/// Lifecycle of the single event-stream connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,

    /// Handshake in flight.
    Connecting,

    /// Connected; directives are sent immediately.
    Open,

    /// Caller-initiated close in progress.
    Closing,
}

impl ConnectionState {
    /// Returns true if the connection is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if a connection exists or is being established.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Closing => "Closing",
        }
    }
}
