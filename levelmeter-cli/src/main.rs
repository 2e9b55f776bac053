//! Headless host for the level-meter engine.
//!
//! Starts the engine on its own thread, attaches an event-forwarding
//! renderer and logs connection changes, series changes and the newest
//! sample of the active device.

mod cli;

use std::fs;
use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use levelmeter_engine::{create_engine, EngineConfig};
use levelmeter_ipc::{
    command_channel, event_channel, DeviceSnapshot, EngineCommand, EngineEvent, SeriesDescriptor,
};

use cli::Cli;

/// How long to wait for replies while exporting and shutting down.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize logging.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "levelmeter={level},levelmeter_engine={level},levelmeter_transport={level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let base = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    Ok(cli.apply(base))
}

/// Host-side copy of the renderer's series list, used to label samples.
struct Chart {
    series: Vec<SeriesDescriptor>,
}

impl Chart {
    fn new() -> Self {
        Self {
            series: vec![SeriesDescriptor::time()],
        }
    }

    /// Returns false once the engine has shut down.
    fn handle(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Ready => info!("Engine ready"),
            EngineEvent::ConnectionChanged { previous, current } => {
                info!(previous = %previous.name(), current = %current.name(), "Connection changed");
            }
            EngineEvent::Error { message } => warn!("{}", message),
            EngineEvent::SeriesAdded(descriptor) => {
                info!(series = %descriptor.label, stroke = %descriptor.stroke, "Series added");
                self.series.push(descriptor);
            }
            EngineEvent::SeriesRemoved { index } => {
                if index < self.series.len() {
                    let removed = self.series.remove(index);
                    info!(series = %removed.label, "Series removed");
                }
            }
            EngineEvent::Data { columns } => self.log_latest(&columns),
            EngineEvent::State(status) => info!(?status, "Engine state"),
            EngineEvent::Snapshot(snapshot) => {
                debug!(device = %snapshot.device, rows = snapshot.columns.first().map_or(0, Vec::len), "Snapshot")
            }
            EngineEvent::Shutdown => {
                info!("Engine shut down");
                return false;
            }
        }
        true
    }

    fn log_latest(&self, columns: &[Vec<f64>]) {
        let rows = columns.first().map_or(0, Vec::len);
        if rows == 0 {
            return;
        }
        let latest: Vec<String> = self
            .series
            .iter()
            .zip(columns)
            .filter_map(|(series, column)| {
                let value = column.last()?;
                Some(if series.is_time() {
                    format!("t={:.2}s", value)
                } else {
                    format!("{}={:.1}", series.label, value)
                })
            })
            .collect();
        info!(rows, "{}", latest.join(" "));
    }
}

/// Pump events into `chart` until `deadline` or engine shutdown.
fn monitor(events: &Receiver<EngineEvent>, chart: &mut Chart, deadline: Option<Instant>) -> bool {
    loop {
        let timeout = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(3600),
        };
        match events.recv_timeout(timeout) {
            Ok(event) => {
                if !chart.handle(event) {
                    return false;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if deadline.is_some() {
                    return true;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

/// Ask the engine for every device's buffer and write them as JSON.
fn export(
    commands: &Sender<EngineCommand>,
    events: &Receiver<EngineEvent>,
    chart: &mut Chart,
    devices: &[String],
    target: &str,
) -> Result<()> {
    for device in devices {
        commands
            .send(EngineCommand::Snapshot {
                device: device.clone(),
            })
            .context("Engine stopped before export")?;
    }

    let mut snapshots: Vec<DeviceSnapshot> = Vec::new();
    while snapshots.len() < devices.len() {
        match events.recv_timeout(REPLY_TIMEOUT) {
            Ok(EngineEvent::Snapshot(snapshot)) => snapshots.push(snapshot),
            Ok(other) => {
                chart.handle(other);
            }
            Err(e) => bail!("Timed out waiting for snapshots: {}", e),
        }
    }

    let json = serde_json::to_string_pretty(&snapshots)?;
    if target == "-" {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", json)?;
    } else {
        fs::write(target, json).with_context(|| format!("Failed to write {}", target))?;
        info!(path = %target, devices = snapshots.len(), "Exported buffers");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    if config.url.is_none() {
        bail!("No stream URL; pass --url or set \"url\" in the config file");
    }
    let devices = config.devices.clone();
    info!(url = ?config.url, devices = ?devices, "Starting level meter");

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let mut engine = create_engine(config, command_rx, event_tx)?;
    let engine_thread = thread::Builder::new()
        .name("levelmeter-engine".to_string())
        .spawn(move || {
            info!("Engine thread starting");
            engine.run();
            info!("Engine thread stopped");
        })
        .context("Failed to spawn engine thread")?;

    if !cli.headless {
        command_tx.send(EngineCommand::SetRendererAttached(true))?;
    }

    let mut chart = Chart::new();
    let deadline = cli.duration.map(|seconds| {
        Instant::now() + Duration::from_secs_f64(seconds.max(0.0).min(f64::from(u32::MAX)))
    });
    let running = monitor(&event_rx, &mut chart, deadline);

    if running {
        command_tx.send(EngineCommand::GetState)?;
        if let Some(target) = cli.export.as_deref() {
            export(&command_tx, &event_rx, &mut chart, &devices, target)?;
        }
        command_tx.send(EngineCommand::Shutdown)?;
        let deadline = Instant::now() + REPLY_TIMEOUT;
        monitor(&event_rx, &mut chart, Some(deadline));
    }

    if engine_thread.join().is_err() {
        bail!("Engine thread panicked");
    }
    Ok(())
}
