//! Commands sent from the host to the engine.

use serde::{Deserialize, Serialize};

/// Commands that the host can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Open the event-stream connection.
    Open { url: String },

    /// Retarget the connection, closing the current one if the URL differs.
    SetUrl { url: String },

    /// Close the event-stream connection.
    Close,

    /// Register every device of the directory that is not yet known.
    LoadDevices(Vec<String>),

    /// Register and subscribe a single device.
    Subscribe(String),

    /// Forget a device and its buffered history.
    RemoveDevice(String),

    /// Select the device whose buffer is pushed to the renderer.
    SetActiveDevice(String),

    /// Pause or resume pushing to the renderer. Ingest continues while paused.
    SetPaused(bool),

    /// Set the trailing window, in seconds, retained per device.
    SetWindowDuration(f64),

    /// Attach or detach the host-side renderer.
    SetRendererAttached(bool),

    /// Request the current engine status.
    GetState,

    /// Request a copy of a device's buffered columns.
    Snapshot { device: String },

    /// Shutdown the engine completely.
    Shutdown,
}
