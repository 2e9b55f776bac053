//! Engine configuration.

use serde::{Deserialize, Serialize};

use levelmeter_ipc::DEFAULT_PALETTE;

/// Default trailing window in seconds.
pub const DEFAULT_WINDOW_SECONDS: f64 = 60.0;

/// Shortest window the engine accepts.
pub const MIN_WINDOW_SECONDS: f64 = 1.0;

/// Longest window the engine accepts.
pub const MAX_WINDOW_SECONDS: f64 = 7200.0;

/// Unit of the `ts` field in direct (legacy) frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    #[default]
    Seconds,
    Milliseconds,
}

impl TimestampUnit {
    /// Convert a raw timestamp to seconds.
    pub fn to_seconds(self, raw: f64) -> f64 {
        match self {
            Self::Seconds => raw,
            Self::Milliseconds => raw / 1000.0,
        }
    }
}

/// Configuration for the level-meter engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Event-stream URL opened when the engine starts (None to wait for a command).
    pub url: Option<String>,

    /// Devices registered and subscribed at start.
    pub devices: Vec<String>,

    /// Device rendered at start.
    pub active_device: Option<String>,

    /// Trailing window kept per device, in seconds.
    pub window_seconds: f64,

    /// Start with renderer pushes paused.
    pub paused: bool,

    /// Unit of `ts` in direct frames. Relay frames are always in seconds.
    pub direct_timestamp_unit: TimestampUnit,

    /// Stroke colours cycled through as channels appear.
    pub palette: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: None,
            devices: Vec::new(),
            active_device: None,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            paused: false,
            direct_timestamp_unit: TimestampUnit::Seconds,
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Clamp a requested window to the accepted range.
pub fn clamp_window(seconds: f64) -> f64 {
    if seconds.is_nan() {
        return DEFAULT_WINDOW_SECONDS;
    }
    seconds.clamp(MIN_WINDOW_SECONDS, MAX_WINDOW_SECONDS)
}
