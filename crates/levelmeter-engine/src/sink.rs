//! Sinks that forward engine output to the host over the event channel.

use crossbeam_channel::Sender;
use tracing::warn;

use levelmeter_ipc::{EngineEvent, SeriesDescriptor};

use crate::error::LevelsError;
use crate::render::RendererSink;

/// Receives every error the engine reports.
pub trait ErrorSink: Send {
    fn report(&self, error: &LevelsError);
}

impl<F> ErrorSink for F
where
    F: Fn(&LevelsError) + Send,
{
    fn report(&self, error: &LevelsError) {
        self(error)
    }
}

fn send_event(event_tx: &Sender<EngineEvent>, event: EngineEvent) {
    if let Err(e) = event_tx.try_send(event) {
        warn!("Failed to send event: {}", e);
    }
}

/// Reports errors as [`EngineEvent::Error`].
#[derive(Debug, Clone)]
pub struct ChannelErrorSink {
    event_tx: Sender<EngineEvent>,
}

impl ChannelErrorSink {
    pub fn new(event_tx: Sender<EngineEvent>) -> Self {
        Self { event_tx }
    }
}

impl ErrorSink for ChannelErrorSink {
    fn report(&self, error: &LevelsError) {
        send_event(
            &self.event_tx,
            EngineEvent::Error {
                message: error.to_string(),
            },
        );
    }
}

/// Renderer that mirrors its series list locally and forwards every change
/// to the host as events, so the host only has to replay them on its chart.
#[derive(Debug)]
pub struct EventRenderer {
    series: Vec<SeriesDescriptor>,
    event_tx: Sender<EngineEvent>,
}

impl EventRenderer {
    /// Create a renderer whose only series is the time axis.
    pub fn new(event_tx: Sender<EngineEvent>) -> Self {
        Self {
            series: vec![SeriesDescriptor::time()],
            event_tx,
        }
    }
}

impl RendererSink for EventRenderer {
    fn series(&self) -> &[SeriesDescriptor] {
        &self.series
    }

    fn add_series(&mut self, descriptor: SeriesDescriptor) {
        self.series.push(descriptor.clone());
        send_event(&self.event_tx, EngineEvent::SeriesAdded(descriptor));
    }

    fn del_series(&mut self, index: usize) {
        if index >= self.series.len() {
            warn!(index, len = self.series.len(), "Ignoring removal of unknown series");
            return;
        }
        self.series.remove(index);
        send_event(&self.event_tx, EngineEvent::SeriesRemoved { index });
    }

    fn set_data(&mut self, columns: Vec<Vec<f64>>) {
        send_event(&self.event_tx, EngineEvent::Data { columns });
    }
}
