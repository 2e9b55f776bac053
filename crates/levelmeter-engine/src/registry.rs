//! Per-device channel tracking.

use std::collections::HashMap;

use tracing::debug;

use levelmeter_ipc::{SeriesDescriptor, LEVEL_SCALE};

/// Channels added and removed by one `ensure_channels` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ChannelDelta {
    /// Whether the registry changed.
    pub fn is_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Registered channels of one device, in order of first sighting.
#[derive(Debug, Clone, Default)]
pub struct DeviceChannels {
    channels: Vec<SeriesDescriptor>,
}

impl DeviceChannels {
    /// Channel names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.label.as_str())
    }

    /// Display descriptors in order.
    pub fn descriptors(&self) -> &[SeriesDescriptor] {
        &self.channels
    }

    /// Descriptor of one channel.
    pub fn get(&self, name: &str) -> Option<&SeriesDescriptor> {
        self.channels.iter().find(|c| c.label == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Tracks the current channel set of every device.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    devices: HashMap<String, DeviceChannels>,
    palette: Vec<String>,
}

impl ChannelRegistry {
    /// Create a registry that colours channels from `palette`.
    pub fn new(palette: Vec<String>) -> Self {
        Self {
            devices: HashMap::new(),
            palette,
        }
    }

    /// Make `names` the registered channel set of `device`.
    ///
    /// New names get the next palette colour (by registry size at the time
    /// they are added); names not in `names` are removed.
    pub fn ensure_channels(&mut self, device: &str, names: &[String]) -> ChannelDelta {
        let palette = &self.palette;
        let entry = self.devices.entry(device.to_string()).or_default();
        let mut delta = ChannelDelta::default();

        for name in names {
            if entry.contains(name) || delta.added.contains(name) {
                continue;
            }
            let stroke = if palette.is_empty() {
                String::new()
            } else {
                palette[entry.channels.len() % palette.len()].clone()
            };
            entry.channels.push(SeriesDescriptor {
                label: name.clone(),
                stroke,
                points_visible: false,
                scale: LEVEL_SCALE.to_string(),
            });
            delta.added.push(name.clone());
        }

        entry.channels.retain(|c| {
            let keep = names.contains(&c.label);
            if !keep {
                delta.removed.push(c.label.clone());
            }
            keep
        });

        if delta.is_changed() {
            debug!(
                device = %device,
                added = ?delta.added,
                removed = ?delta.removed,
                "Channels changed"
            );
        }
        delta
    }

    /// Registered channels of `device`.
    pub fn channels(&self, device: &str) -> Option<&DeviceChannels> {
        self.devices.get(device)
    }

    /// Forget `device` entirely.
    pub fn remove_device(&mut self, device: &str) -> bool {
        self.devices.remove(device).is_some()
    }
}
