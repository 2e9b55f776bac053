//! Synchronous level-meter core.
//!
//! [`LevelsEngine`] owns the channel registry, the device buffers, the
//! ingest dispatcher and the render bridge. It performs no I/O and has no
//! threads: the caller feeds it frames and commands one at a time, which
//! serializes ingest with every read of buffer state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use levelmeter_ipc::{DeviceSnapshot, IngestStats, TIME_SERIES_LABEL};

use crate::buffer::SampleBuffers;
use crate::config::{clamp_window, EngineConfig};
use crate::dispatcher::{Dispatch, IgnoreReason, IngestDispatcher};
use crate::error::LevelsError;
use crate::registry::ChannelRegistry;
use crate::render::{RenderBridge, RendererSink};
use crate::sink::ErrorSink;
use crate::stats::IngestStatsCollector;
use crate::LevelsResult;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Appended to a device buffer.
    Ingested {
        device: String,
        channels_changed: bool,
        pushed: bool,
    },

    /// Dropped without error.
    Ignored(IgnoreReason),

    /// Reported to the error sink and dropped.
    Rejected,
}

/// Device state, buffering and rendering for the level meter.
pub struct LevelsEngine {
    devices: Vec<String>,
    registry: ChannelRegistry,
    buffers: SampleBuffers,
    dispatcher: IngestDispatcher,
    bridge: RenderBridge,
    window_seconds: f64,
    errors: Box<dyn ErrorSink>,
    stats: Arc<IngestStatsCollector>,
}

impl LevelsEngine {
    /// Create a core from `config`, registering its devices and active device.
    pub fn new(config: &EngineConfig, errors: Box<dyn ErrorSink>) -> Self {
        let mut engine = Self {
            devices: Vec::new(),
            registry: ChannelRegistry::new(config.palette.clone()),
            buffers: SampleBuffers::new(),
            dispatcher: IngestDispatcher::new(config.direct_timestamp_unit),
            bridge: RenderBridge::new(config.paused),
            window_seconds: clamp_window(config.window_seconds),
            errors,
            stats: Arc::new(IngestStatsCollector::new()),
        };
        engine.load_devices(&config.devices);
        if let Some(device) = config.active_device.as_deref() {
            engine.set_active_device(device);
        }
        engine
    }

    /// Replace the dispatcher, e.g. to inject a clock.
    pub fn with_dispatcher(mut self, dispatcher: IngestDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Register `device` with an empty buffer. Returns false if already known.
    pub fn add_device(&mut self, device: &str) -> bool {
        if self.is_known(device) {
            return false;
        }
        info!(device = %device, "Adding device");
        self.devices.push(device.to_string());
        self.buffers.add_device(device);
        self.registry.ensure_channels(device, &[]);
        true
    }

    /// Register every device not yet known. Returns the newly added ones.
    pub fn load_devices(&mut self, devices: &[String]) -> Vec<String> {
        devices
            .iter()
            .filter(|d| self.add_device(d))
            .cloned()
            .collect()
    }

    /// Forget `device`, its channels and its buffered history.
    pub fn remove_device(&mut self, device: &str) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d != device);
        if before == self.devices.len() {
            return false;
        }
        info!(device = %device, "Removing device");
        self.buffers.remove_device(device);
        self.registry.remove_device(device);
        if self.bridge.clear_active(device) {
            debug!(device = %device, "Removed device was active");
        }
        true
    }

    pub fn is_known(&self, device: &str) -> bool {
        self.devices.iter().any(|d| d == device)
    }

    /// Known devices in registration order.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Process one inbound frame.
    pub fn ingest(&mut self, text: &str) -> IngestOutcome {
        self.stats.record_received();
        let result = self.dispatcher.dispatch(
            text,
            self.bridge.active(),
            &mut self.registry,
            &mut self.buffers,
            self.window_seconds,
        );

        match result {
            Ok(Dispatch::Ingested { device, delta, .. }) => {
                self.stats.record_ingested();
                let channels_changed = delta.is_changed();
                let pushed =
                    self.bridge
                        .on_ingest(&device, channels_changed, &self.registry, &self.buffers);
                IngestOutcome::Ingested {
                    device,
                    channels_changed,
                    pushed,
                }
            }
            Ok(Dispatch::Ignored(reason)) => {
                self.stats.record_ignored();
                match &reason {
                    IgnoreReason::UnknownDevice(device) => {
                        warn!(device = %device, "No cached data for device, ignoring levels")
                    }
                    IgnoreReason::NoActiveDevice => {
                        warn!("No active device for unnamed levels, ignoring")
                    }
                    IgnoreReason::OutOfOrder(device) => {
                        debug!(device = %device, "Ignoring out of order levels")
                    }
                    IgnoreReason::Status => debug!("Ignoring status update"),
                }
                IngestOutcome::Ignored(reason)
            }
            Err(e) => {
                self.report(&e);
                IngestOutcome::Rejected
            }
        }
    }

    /// Switch the rendered device.
    ///
    /// An unknown device is reported once and leaves the active device as it
    /// was. Returns whether the switch happened.
    pub fn set_active_device(&mut self, device: &str) -> bool {
        if !self.is_known(device) {
            self.report(&LevelsError::UnknownDevice(device.to_string()));
            return false;
        }
        info!(device = %device, "Setting active device");
        self.bridge.set_active(device, &self.registry, &self.buffers);
        true
    }

    pub fn active_device(&self) -> Option<&str> {
        self.bridge.active()
    }

    /// Pause or resume renderer pushes. Ingest carries on while paused.
    pub fn set_paused(&mut self, paused: bool) {
        debug!(paused, "Setting paused");
        self.bridge.set_paused(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.bridge.is_paused()
    }

    /// Set the trailing window, clamped to the accepted range, and trim every
    /// buffer to it. Returns the window in effect.
    pub fn set_window_duration(&mut self, seconds: f64) -> f64 {
        let window = clamp_window(seconds);
        if window != seconds {
            warn!(requested = seconds, window, "Window duration out of range, clamped");
        }
        self.window_seconds = window;
        for device in &self.devices {
            self.buffers.trim(device, window, &self.registry);
        }
        window
    }

    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }

    /// Attach or detach the renderer. Buffering is unaffected either way.
    pub fn set_renderer(&mut self, renderer: Option<Box<dyn RendererSink>>) -> bool {
        self.bridge
            .set_renderer(renderer, &self.registry, &self.buffers)
    }

    pub fn has_renderer(&self) -> bool {
        self.bridge.has_renderer()
    }

    /// Hand an error to the error sink.
    pub fn report(&self, error: &LevelsError) {
        warn!(error = %error, "Reporting error");
        self.stats.record_error();
        self.errors.report(error);
    }

    /// Copy of `device`'s buffered columns, time first.
    ///
    /// Includes columns of channels that have vanished but still hold data
    /// inside the window.
    pub fn snapshot(&self, device: &str) -> LevelsResult<DeviceSnapshot> {
        let buffer = self
            .buffers
            .get(device)
            .ok_or_else(|| LevelsError::UnknownDevice(device.to_string()))?;

        let labels: Vec<String> = std::iter::once(TIME_SERIES_LABEL)
            .chain(buffer.channel_names())
            .map(str::to_string)
            .collect();
        let columns = buffer.columns_for(labels.iter().map(String::as_str));

        Ok(DeviceSnapshot {
            device: device.to_string(),
            first_timestamp: buffer.first_timestamp(),
            labels,
            columns,
        })
    }

    /// Registered channel names of `device`.
    pub fn channels(&self, device: &str) -> Vec<String> {
        self.registry
            .channels(device)
            .map(|c| c.names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Current ingest counters.
    pub fn stats(&self) -> IngestStats {
        self.stats.snapshot()
    }

    /// Shared handle to the ingest counters.
    pub fn stats_collector(&self) -> Arc<IngestStatsCollector> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::render::tests::RecordingRenderer;

    fn levels(device: &str, ts: f64, values: &[(&str, f64)]) -> String {
        let levels: Vec<String> = values
            .iter()
            .map(|(n, v)| format!("\"{}\":{}", n, v))
            .collect();
        format!(
            r#"{{"message":"Levels","data":{{"name":"{}","ts":{},"levels":{{{}}}}}}}"#,
            device,
            ts,
            levels.join(",")
        )
    }

    fn engine(devices: &[&str]) -> (LevelsEngine, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink_errors = Arc::clone(&errors);
        let config = EngineConfig {
            devices: devices.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        };
        let engine = LevelsEngine::new(
            &config,
            Box::new(move |e: &LevelsError| sink_errors.lock().push(e.to_string())),
        );
        (engine, errors)
    }

    #[test]
    fn test_new_channel_scenario() {
        let (mut engine, errors) = engine(&["A"]);

        let outcome = engine.ingest(&levels("A", 100.0, &[("I1", -10.0)]));
        assert!(matches!(outcome, IngestOutcome::Ingested { channels_changed: true, .. }));
        assert_eq!(engine.channels("A"), vec!["I1"]);

        let outcome = engine.ingest(&levels("A", 101.0, &[("I1", -9.0), ("I2", -20.0)]));
        assert!(matches!(outcome, IngestOutcome::Ingested { channels_changed: true, .. }));
        assert_eq!(engine.channels("A"), vec!["I1", "I2"]);

        let snapshot = engine.snapshot("A").unwrap();
        assert_eq!(snapshot.first_timestamp, Some(100.0));
        assert_eq!(snapshot.labels, vec!["Time", "I1", "I2"]);
        assert_eq!(snapshot.columns[0], vec![0.0, 1.0]);
        assert_eq!(snapshot.columns[1], vec![-10.0, -9.0]);
        assert!(snapshot.columns[2][0].is_nan());
        assert_eq!(snapshot.columns[2][1], -20.0);
        assert!(errors.lock().is_empty());
    }

    #[test]
    fn test_window_scenario() {
        let (mut engine, _) = engine(&["A"]);
        engine.set_window_duration(60.0);
        for ts in [0.0, 30.0, 65.0] {
            engine.ingest(&levels("A", ts, &[("I1", -1.0)]));
        }
        assert_eq!(engine.snapshot("A").unwrap().columns[0], vec![30.0, 65.0]);
    }

    #[test]
    fn test_unknown_device_guard_reports_once() {
        let (mut engine, errors) = engine(&["A"]);
        assert!(engine.set_active_device("A"));

        assert!(!engine.set_active_device("ghost"));
        assert_eq!(engine.active_device(), Some("A"));
        assert_eq!(*errors.lock(), vec!["Unknown device ghost".to_string()]);
        assert_eq!(engine.stats().errors_reported, 1);
    }

    #[test]
    fn test_unknown_device_frames_do_not_create_devices() {
        let (mut engine, errors) = engine(&["A"]);
        let outcome = engine.ingest(&levels("B", 1.0, &[("I1", -1.0)]));

        assert_eq!(
            outcome,
            IngestOutcome::Ignored(IgnoreReason::UnknownDevice("B".to_string()))
        );
        assert!(!engine.is_known("B"));
        assert!(engine.snapshot("B").is_err());
        assert!(errors.lock().is_empty());
    }

    #[test]
    fn test_bad_frame_does_not_stop_ingest() {
        let (mut engine, errors) = engine(&["A"]);

        assert_eq!(engine.ingest("{oops"), IngestOutcome::Rejected);
        assert_eq!(engine.ingest("{}"), IngestOutcome::Rejected);
        assert_eq!(engine.ingest(r#"{"weird":true}"#), IngestOutcome::Rejected);
        assert!(matches!(
            engine.ingest(&levels("A", 1.0, &[("I1", -1.0)])),
            IngestOutcome::Ingested { .. }
        ));

        let errors = errors.lock();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[1], "No data in levels update");
        assert!(errors[2].starts_with("Unexpected data"));

        let stats = engine.stats();
        assert_eq!(stats.frames_received, 4);
        assert_eq!(stats.frames_ingested, 1);
        assert_eq!(stats.errors_reported, 3);
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let (mut engine, _) = engine(&["A"]);
        let recorder = RecordingRenderer::default();
        engine.set_renderer(Some(recorder.sink()));
        engine.set_active_device("A");

        engine.ingest(&levels("A", 0.0, &[("I1", -1.0)]));
        let pushes = recorder.pushes();

        engine.set_paused(true);
        for ts in [1.0, 2.0, 3.0] {
            let outcome = engine.ingest(&levels("A", ts, &[("I1", -ts)]));
            assert!(matches!(outcome, IngestOutcome::Ingested { pushed: false, .. }));
        }
        assert_eq!(recorder.pushes(), pushes);

        engine.set_paused(false);
        assert_eq!(recorder.pushes(), pushes);
        engine.ingest(&levels("A", 4.0, &[("I1", -4.0)]));

        let last = recorder.last_push().unwrap();
        assert_eq!(last[0], vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(last[1], vec![-1.0, -1.0, -2.0, -3.0, -4.0]);
    }

    #[test]
    fn test_late_sample_is_ignored_not_ingested() {
        let (mut engine, errors) = engine(&["A"]);
        let recorder = RecordingRenderer::default();
        engine.set_renderer(Some(recorder.sink()));
        engine.set_active_device("A");

        engine.ingest(&levels("A", 10.0, &[("I1", -1.0)]));
        engine.ingest(&levels("A", 12.0, &[("I1", -2.0)]));
        let pushes = recorder.pushes();
        let labels = recorder.labels();

        let outcome = engine.ingest(&levels("A", 11.0, &[("I1", -3.0), ("I2", -4.0)]));
        assert_eq!(
            outcome,
            IngestOutcome::Ignored(IgnoreReason::OutOfOrder("A".to_string()))
        );
        assert_eq!(engine.snapshot("A").unwrap().columns[0], vec![0.0, 2.0]);
        assert_eq!(engine.channels("A"), vec!["I1"]);
        assert_eq!(recorder.pushes(), pushes);
        assert_eq!(recorder.labels(), labels);
        assert!(errors.lock().is_empty());

        let stats = engine.stats();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.frames_ingested, 2);
        assert_eq!(stats.frames_ignored, 1);
    }

    #[test]
    fn test_registered_channel_with_only_nulls_survives_trim() {
        let (mut engine, _) = engine(&["A"]);
        engine.set_window_duration(10.0);
        engine.ingest(&levels("A", 0.0, &[("I1", -1.0), ("I2", -2.0)]));
        engine.ingest(r#"{"message":"Levels","data":{"name":"A","ts":20,"levels":{"I1":-1,"I2":null}}}"#);

        let snapshot = engine.snapshot("A").unwrap();
        assert_eq!(snapshot.labels, vec!["Time", "I1", "I2"]);
        assert_eq!(snapshot.columns[0], vec![20.0]);
        assert!(snapshot.columns[2][0].is_nan());
    }

    #[test]
    fn test_detached_renderer_keeps_buffering() {
        let (mut engine, _) = engine(&["A"]);
        engine.set_active_device("A");
        let outcome = engine.ingest(&levels("A", 0.0, &[("I1", -1.0)]));
        assert!(matches!(outcome, IngestOutcome::Ingested { pushed: false, .. }));
        assert_eq!(engine.snapshot("A").unwrap().columns[0].len(), 1);
    }

    #[test]
    fn test_load_and_remove_devices() {
        let (mut engine, _) = engine(&["A"]);
        let added = engine.load_devices(&["A".to_string(), "B".to_string(), "C".to_string()]);
        assert_eq!(added, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(engine.devices(), &["A", "B", "C"]);

        engine.set_active_device("B");
        assert!(engine.remove_device("B"));
        assert!(!engine.remove_device("B"));
        assert_eq!(engine.active_device(), None);
        assert!(!engine.is_known("B"));
    }

    #[test]
    fn test_window_is_clamped() {
        let (mut engine, _) = engine(&[]);
        assert_eq!(engine.set_window_duration(0.0), 1.0);
        assert_eq!(engine.set_window_duration(9_000.0), 7200.0);
        assert_eq!(engine.window_seconds(), 7200.0);
    }
}
