//! Events sent from the engine to the host.

use serde::{Deserialize, Serialize};

use crate::state::ConnectionState;
use crate::types::{DeviceSnapshot, EngineStatus, SeriesDescriptor};

/// Events that the engine can send to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Connection state has changed.
    ConnectionChanged {
        /// Previous state.
        previous: ConnectionState,

        /// Current state.
        current: ConnectionState,
    },

    /// Error occurred. The engine keeps running after every error.
    Error {
        /// Error message.
        message: String,
    },

    /// A series was declared on the renderer.
    SeriesAdded(SeriesDescriptor),

    /// The series at `index` was removed from the renderer.
    SeriesRemoved { index: usize },

    /// Full column set for the active device, aligned with the declared
    /// series (time column first).
    Data { columns: Vec<Vec<f64>> },

    /// Current engine status.
    State(EngineStatus),

    /// Buffered columns of one device.
    Snapshot(DeviceSnapshot),

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
