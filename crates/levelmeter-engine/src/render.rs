//! Bridge between device buffers and the attached renderer.

use tracing::{debug, trace};

use levelmeter_ipc::SeriesDescriptor;

use crate::buffer::SampleBuffers;
use crate::registry::ChannelRegistry;

/// Chart-like sink that displays one device's columns.
///
/// The first declared series is the implicit time axis; `set_data` columns
/// are aligned with `series()`.
pub trait RendererSink: Send {
    /// Currently declared series, time axis first.
    fn series(&self) -> &[SeriesDescriptor];

    /// Declare a new series at the end of the list.
    fn add_series(&mut self, descriptor: SeriesDescriptor);

    /// Remove the series at `index`.
    fn del_series(&mut self, index: usize);

    /// Replace the displayed data.
    fn set_data(&mut self, columns: Vec<Vec<f64>>);
}

/// Decides when and what to push to the renderer.
pub struct RenderBridge {
    renderer: Option<Box<dyn RendererSink>>,
    active: Option<String>,
    paused: bool,
    series_dirty: bool,
}

impl RenderBridge {
    pub fn new(paused: bool) -> Self {
        Self {
            renderer: None,
            active: None,
            paused,
            series_dirty: true,
        }
    }

    /// Attach or detach the renderer.
    ///
    /// An attached renderer is brought up to date with the active device
    /// straight away unless paused.
    pub fn set_renderer(
        &mut self,
        renderer: Option<Box<dyn RendererSink>>,
        registry: &ChannelRegistry,
        buffers: &SampleBuffers,
    ) -> bool {
        debug!(attached = renderer.is_some(), "Renderer changed");
        self.renderer = renderer;
        self.series_dirty = true;
        self.refresh(registry, buffers)
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    /// Switch the rendered device. The caller has checked it is known.
    pub fn set_active(
        &mut self,
        device: &str,
        registry: &ChannelRegistry,
        buffers: &SampleBuffers,
    ) -> bool {
        self.active = Some(device.to_string());
        self.series_dirty = true;
        self.refresh(registry, buffers)
    }

    /// Stop rendering `device` if it is the active one.
    pub fn clear_active(&mut self, device: &str) -> bool {
        if self.active.as_deref() != Some(device) {
            return false;
        }
        self.active = None;
        self.series_dirty = true;
        true
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Pause or resume pushes. Resuming waits for the next ingest to push.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// React to a sample appended to `device`. Returns whether data was pushed.
    pub fn on_ingest(
        &mut self,
        device: &str,
        channels_changed: bool,
        registry: &ChannelRegistry,
        buffers: &SampleBuffers,
    ) -> bool {
        if self.active.as_deref() != Some(device) {
            return false;
        }
        if channels_changed {
            self.series_dirty = true;
        }
        self.refresh(registry, buffers)
    }

    /// Reconcile series if needed and push the active device's columns.
    fn refresh(&mut self, registry: &ChannelRegistry, buffers: &SampleBuffers) -> bool {
        if self.paused {
            return false;
        }
        let (Some(device), Some(renderer)) = (self.active.as_deref(), self.renderer.as_mut()) else {
            return false;
        };

        if self.series_dirty {
            reconcile(&mut **renderer, device, registry);
            self.series_dirty = false;
        }

        let Some(buffer) = buffers.get(device) else {
            return false;
        };
        let labels: Vec<String> = renderer.series().iter().map(|s| s.label.clone()).collect();
        let columns = buffer.columns_for(labels.iter().map(String::as_str));
        trace!(device = %device, rows = buffer.len(), series = labels.len(), "Pushing data");
        renderer.set_data(columns);
        true
    }
}

/// Make the renderer's series match `device`'s registered channels, by label.
/// The time series is never touched.
fn reconcile(renderer: &mut dyn RendererSink, device: &str, registry: &ChannelRegistry) {
    let wanted: &[SeriesDescriptor] = registry
        .channels(device)
        .map(|c| c.descriptors())
        .unwrap_or(&[]);

    let mut stale: Vec<usize> = renderer
        .series()
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_time() && !wanted.iter().any(|w| w.label == s.label))
        .map(|(i, _)| i)
        .collect();
    // Highest index first so earlier indices stay valid.
    stale.sort_unstable_by(|a, b| b.cmp(a));
    for index in stale {
        debug!(device = %device, index, "Deleting series");
        renderer.del_series(index);
    }

    for descriptor in wanted {
        if !renderer.series().iter().any(|s| s.label == descriptor.label) {
            debug!(device = %device, series = %descriptor.label, "Adding series");
            renderer.add_series(descriptor.clone());
        }
    }
}
