//! Common types used across IPC messages.

use serde::{Deserialize, Serialize};

use crate::state::ConnectionState;

/// Label of the implicit time series every renderer declares first.
pub const TIME_SERIES_LABEL: &str = "Time";

/// Scale that level series are plotted against.
pub const LEVEL_SCALE: &str = "dB";

/// Stroke colours cycled through as channels are first seen.
pub const DEFAULT_PALETTE: [&str; 6] = [
    "#42a5f5", "#ba68c8", "#ef5350", "#ff9800", "#03a9f4", "#4caf50",
];

/// Display descriptor for one renderer series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDescriptor {
    /// Channel name, also the series label.
    pub label: String,

    /// Stroke colour.
    pub stroke: String,

    /// Whether individual points are drawn.
    pub points_visible: bool,

    /// Scale (axis) assignment.
    pub scale: String,
}

impl SeriesDescriptor {
    /// Descriptor for the implicit time series.
    pub fn time() -> Self {
        Self {
            label: TIME_SERIES_LABEL.to_string(),
            stroke: String::new(),
            points_visible: false,
            scale: "x".to_string(),
        }
    }

    /// Returns true if this is the implicit time series.
    pub fn is_time(&self) -> bool {
        self.label == TIME_SERIES_LABEL
    }
}

/// Counters describing ingest activity since the engine started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Frames received from the connection.
    pub frames_received: u64,

    /// Telemetry frames appended to a device buffer.
    pub frames_ingested: u64,

    /// Status frames and frames for unknown devices.
    pub frames_ignored: u64,

    /// Errors reported to the host.
    pub errors_reported: u64,
}

/// Engine status snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Current connection state.
    pub connection: ConnectionState,

    /// Connection URL, if one was ever opened.
    pub url: Option<String>,

    /// Known devices in registration order.
    pub devices: Vec<String>,

    /// Device currently pushed to the renderer.
    pub active_device: Option<String>,

    /// Whether pushing to the renderer is paused.
    pub paused: bool,

    /// Trailing window in seconds.
    pub window_seconds: f64,

    /// Ingest counters.
    pub stats: IngestStats,
}

/// Copy of one device's buffered columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Device name.
    pub device: String,

    /// Absolute timestamp (seconds) that the time column is relative to.
    pub first_timestamp: Option<f64>,

    /// Column labels, `Time` first.
    pub labels: Vec<String>,

    /// Columns, aligned with `labels`. Missing values are `NaN`.
    pub columns: Vec<Vec<f64>>,
}
