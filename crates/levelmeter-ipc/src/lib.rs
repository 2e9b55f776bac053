//! Typed host<->engine messages for the level meter.
//!
//! This crate defines the message types exchanged between a host (UI or
//! CLI) and the level-meter streaming engine.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::ConnectionState;
pub use types::{
    DeviceSnapshot, EngineStatus, IngestStats, SeriesDescriptor, DEFAULT_PALETTE, LEVEL_SCALE,
    TIME_SERIES_LABEL,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (host → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
