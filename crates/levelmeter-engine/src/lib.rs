//! Level-meter streaming engine.
//!
//! This crate turns a stream of per-device level telemetry into bounded,
//! time-windowed column buffers and keeps an attached renderer in step with
//! the active device. [`LevelsEngine`] is the synchronous core;
//! [`Engine`] runs it on a thread, driven by host commands and by the
//! events of the owned [`StreamConnection`](levelmeter_transport::StreamConnection).

mod buffer;
mod config;
mod dispatcher;
mod error;
mod levels;
mod orchestrator;
mod registry;
mod render;
mod sink;
mod stats;

pub use buffer::{AppendOutcome, SampleBuffers, WindowedBuffer};
pub use config::{
    clamp_window, EngineConfig, TimestampUnit, DEFAULT_WINDOW_SECONDS, MAX_WINDOW_SECONDS,
    MIN_WINDOW_SECONDS,
};
pub use dispatcher::{
    wall_clock_seconds, Dispatch, Frame, IgnoreReason, IngestDispatcher, Telemetry,
    LEVELS_MESSAGE,
};
pub use error::LevelsError;
pub use levels::{IngestOutcome, LevelsEngine};
pub use orchestrator::Engine;
pub use registry::{ChannelDelta, ChannelRegistry, DeviceChannels};
pub use render::{RenderBridge, RendererSink};
pub use sink::{ChannelErrorSink, ErrorSink, EventRenderer};
pub use stats::IngestStatsCollector;

use crossbeam_channel::{Receiver, Sender};

use levelmeter_ipc::{EngineCommand, EngineEvent};

/// Result type for engine operations.
pub type LevelsResult<T> = Result<T, LevelsError>;

/// Create an engine instance with IPC channels.
pub fn create_engine(
    config: EngineConfig,
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
) -> LevelsResult<Engine> {
    Engine::new(config, command_rx, event_tx)
}
