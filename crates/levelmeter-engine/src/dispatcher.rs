//! Inbound frame parsing and routing.
//!
//! Frames arrive as JSON text in one of three telemetry shapes:
//!
//! - relay: `{"message":"Levels","data":{"name":..,"ts":..,"levels":{..}}}`
//! - direct: `{"ts":..,"input":[..],"output":[..]}` with an optional `name`
//! - named legacy: `{"name":..,"input_levels":[..],"output_levels":[..]}`,
//!   which carries no timestamp and is stamped with the wall clock
//!
//! Status broadcasts (other relay messages, `masterVolume`, `master`) are
//! ignored. Everything else is reported as unexpected.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::buffer::{AppendOutcome, SampleBuffers};
use crate::config::TimestampUnit;
use crate::error::LevelsError;
use crate::registry::{ChannelDelta, ChannelRegistry};
use crate::LevelsResult;

/// Relay message name that carries telemetry.
pub const LEVELS_MESSAGE: &str = "Levels";

/// One parsed telemetry sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Originating device. Nameless direct frames belong to the active device.
    pub device: Option<String>,

    /// Sample time in seconds.
    pub timestamp: f64,

    /// Channel values in frame order. `null` levels are `NaN`.
    pub levels: Vec<(String, f64)>,
}

impl Telemetry {
    /// Channel names in frame order.
    pub fn channel_names(&self) -> Vec<String> {
        self.levels.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Classified frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Device status rather than telemetry.
    Status,

    /// Level sample.
    Telemetry(Telemetry),
}

/// Why a well-formed frame was not ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Status broadcast.
    Status,

    /// Telemetry for a device that was never loaded or subscribed.
    UnknownDevice(String),

    /// Nameless telemetry with no active device to attribute it to.
    NoActiveDevice,

    /// Sample older than the device's newest row; the buffer is unchanged.
    OutOfOrder(String),
}

/// Result of dispatching one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Sample handed to the device's buffer.
    Ingested {
        device: String,
        delta: ChannelDelta,
        outcome: AppendOutcome,
    },

    /// Frame dropped without error.
    Ignored(IgnoreReason),
}

#[derive(Debug, Deserialize)]
struct RelayLevels {
    name: String,
    ts: f64,
    levels: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DirectLevels {
    #[serde(default)]
    name: Option<String>,
    ts: f64,
    input: Vec<Option<f64>>,
    #[serde(default)]
    output: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct NamedLevels {
    #[serde(default)]
    name: Option<String>,
    input_levels: Vec<Option<f64>>,
    #[serde(default)]
    output_levels: Vec<Option<f64>>,
}

/// Seconds since the Unix epoch.
pub fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Parses inbound frames and routes telemetry to device buffers.
#[derive(Debug, Clone)]
pub struct IngestDispatcher {
    timestamp_unit: TimestampUnit,
    clock: fn() -> f64,
}

impl IngestDispatcher {
    /// Create a dispatcher reading direct-form `ts` in `timestamp_unit`.
    pub fn new(timestamp_unit: TimestampUnit) -> Self {
        Self {
            timestamp_unit,
            clock: wall_clock_seconds,
        }
    }

    /// Replace the clock used to stamp frames without a timestamp.
    pub fn with_clock(mut self, clock: fn() -> f64) -> Self {
        self.clock = clock;
        self
    }

    /// Parse and classify one frame.
    pub fn parse(&self, text: &str) -> LevelsResult<Frame> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| LevelsError::MalformedFrame(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(LevelsError::UnexpectedData(text.to_string()));
        };
        if object.is_empty() {
            return Err(LevelsError::NoData);
        }

        if let Some(message) = object.get("message") {
            if message.as_str() != Some(LEVELS_MESSAGE) {
                trace!(?message, "Ignoring relay status message");
                return Ok(Frame::Status);
            }
            return match object.get("data") {
                Some(Value::Object(data)) if data.is_empty() => Err(LevelsError::NoData),
                Some(Value::Object(data)) if data.contains_key("name") && data.contains_key("levels") => {
                    let relay: RelayLevels = deserialize(Value::Object(data.clone()))?;
                    Ok(Frame::Telemetry(Telemetry {
                        device: Some(relay.name),
                        timestamp: relay.ts,
                        levels: relay_levels(relay.levels)?,
                    }))
                }
                Some(Value::Null) | None => Err(LevelsError::NoData),
                Some(other) => Err(LevelsError::UnexpectedData(other.to_string())),
            };
        }

        if object.contains_key("masterVolume") || object.contains_key("master") {
            return Ok(Frame::Status);
        }

        if object.contains_key("input_levels") {
            let named: NamedLevels = deserialize(Value::Object(object))?;
            return Ok(Frame::Telemetry(Telemetry {
                device: named.name,
                timestamp: (self.clock)(),
                levels: positional_levels(&named.input_levels, &named.output_levels),
            }));
        }

        if object.contains_key("input") {
            let direct: DirectLevels = deserialize(Value::Object(object))?;
            return Ok(Frame::Telemetry(Telemetry {
                device: direct.name,
                timestamp: self.timestamp_unit.to_seconds(direct.ts),
                levels: positional_levels(&direct.input, &direct.output),
            }));
        }

        Err(LevelsError::UnexpectedData(text.to_string()))
    }

    /// Parse one frame and, for telemetry of a known device, update its
    /// channels and buffer.
    ///
    /// Nameless telemetry is attributed to `active`. An out-of-order sample
    /// is ignored before it can touch the device's channels. The buffer is
    /// trimmed to `window` seconds after every append.
    pub fn dispatch(
        &self,
        text: &str,
        active: Option<&str>,
        registry: &mut ChannelRegistry,
        buffers: &mut SampleBuffers,
        window: f64,
    ) -> LevelsResult<Dispatch> {
        let telemetry = match self.parse(text)? {
            Frame::Status => return Ok(Dispatch::Ignored(IgnoreReason::Status)),
            Frame::Telemetry(telemetry) => telemetry,
        };

        let device = match telemetry.device.as_deref().or(active) {
            Some(device) => device.to_string(),
            None => return Ok(Dispatch::Ignored(IgnoreReason::NoActiveDevice)),
        };
        if !buffers.contains(&device) {
            debug!(device = %device, "No buffer for device, ignoring levels");
            return Ok(Dispatch::Ignored(IgnoreReason::UnknownDevice(device)));
        }

        if buffers.is_out_of_order(&device, telemetry.timestamp, window) {
            debug!(device = %device, ts = telemetry.timestamp, "Dropping out of order sample");
            return Ok(Dispatch::Ignored(IgnoreReason::OutOfOrder(device)));
        }

        let delta = registry.ensure_channels(&device, &telemetry.channel_names());
        let outcome = match buffers.append(&device, telemetry.timestamp, &telemetry.levels, window) {
            Some(AppendOutcome::OutOfOrder { .. }) => {
                return Ok(Dispatch::Ignored(IgnoreReason::OutOfOrder(device)));
            }
            Some(outcome) => outcome,
            None => return Ok(Dispatch::Ignored(IgnoreReason::UnknownDevice(device))),
        };
        let trimmed = buffers.trim(&device, window, registry);
        trace!(device = %device, ts = telemetry.timestamp, trimmed, "Ingested levels");

        Ok(Dispatch::Ingested {
            device,
            delta,
            outcome,
        })
    }
}

impl Default for IngestDispatcher {
    fn default() -> Self {
        Self::new(TimestampUnit::default())
    }
}

fn deserialize<T: for<'de> Deserialize<'de>>(value: Value) -> LevelsResult<T> {
    serde_json::from_value(value).map_err(|e| LevelsError::MalformedFrame(e.to_string()))
}

fn relay_levels(levels: Map<String, Value>) -> LevelsResult<Vec<(String, f64)>> {
    levels
        .into_iter()
        .map(|(name, value)| match value {
            Value::Null => Ok((name, f64::NAN)),
            Value::Number(n) => Ok((name, n.as_f64().unwrap_or(f64::NAN))),
            other => Err(LevelsError::MalformedFrame(format!(
                "level {} is not a number: {}",
                name, other
            ))),
        })
        .collect()
}

/// Names channels `I1..` then `O1..` by position.
fn positional_levels(input: &[Option<f64>], output: &[Option<f64>]) -> Vec<(String, f64)> {
    let inputs = input
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("I{}", i + 1), v.unwrap_or(f64::NAN)));
    let outputs = output
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("O{}", i + 1), v.unwrap_or(f64::NAN)));
    inputs.chain(outputs).collect()
}
