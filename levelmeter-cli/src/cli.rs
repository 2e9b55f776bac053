use std::path::PathBuf;

use clap::Parser;

use levelmeter_engine::{EngineConfig, TimestampUnit};

#[derive(Parser, Debug)]
#[command(
    name = "levelmeter",
    version,
    about = "Monitor live level-meter telemetry from a websocket source",
    long_about = "Connects to a level telemetry relay or a device's direct endpoint, \
                  buffers every subscribed device and logs what a chart would show.\n\
                  Set RUST_LOG to override the log filter."
)]
pub struct Cli {
    /// JSON engine config; flags below override its values
    #[arg(long, env = "LEVELMETER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Websocket URL of the telemetry source (ws:// or wss://)
    #[arg(long, env = "LEVELMETER_URL")]
    pub url: Option<String>,

    /// Device to subscribe to (repeatable)
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<String>,

    /// Device to render; defaults to the first device
    #[arg(long)]
    pub active: Option<String>,

    /// Trailing window in seconds (1 to 7200)
    #[arg(long)]
    pub window: Option<f64>,

    /// Start with renderer pushes paused
    #[arg(long)]
    pub paused: bool,

    /// Direct-form timestamps are in milliseconds
    #[arg(long)]
    pub direct_ms: bool,

    /// Stop after this many seconds; runs until interrupted otherwise
    #[arg(long)]
    pub duration: Option<f64>,

    /// Write every device's buffer as JSON on exit ("-" for stdout)
    #[arg(long)]
    pub export: Option<String>,

    /// Do not attach a renderer; only buffer
    #[arg(long)]
    pub headless: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Layer command-line values over `base`.
    pub fn apply(&self, mut base: EngineConfig) -> EngineConfig {
        if let Some(url) = &self.url {
            base.url = Some(url.clone());
        }
        for device in &self.devices {
            if !base.devices.contains(device) {
                base.devices.push(device.clone());
            }
        }
        if let Some(active) = &self.active {
            base.active_device = Some(active.clone());
        }
        if base.active_device.is_none() {
            base.active_device = base.devices.first().cloned();
        }
        if let Some(window) = self.window {
            base.window_seconds = window;
        }
        if self.paused {
            base.paused = true;
        }
        if self.direct_ms {
            base.direct_timestamp_unit = TimestampUnit::Milliseconds;
        }
        base
    }
}
