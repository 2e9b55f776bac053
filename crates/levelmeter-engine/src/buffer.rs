//! Time-windowed, column-oriented sample buffers.
//!
//! Each device owns one [`WindowedBuffer`]: a time column holding offsets
//! (seconds) from the first retained arrival, plus one column per channel.
//! Every column always has the same length as the time column. A channel
//! first seen mid-stream is back-filled with `NaN`; a channel that stops
//! appearing keeps its history and is padded with `NaN` until trimming
//! leaves nothing but padding, at which point the column is dropped. Columns
//! of channels that are still registered are never dropped.

use std::collections::HashMap;

use tracing::{debug, warn};

use levelmeter_ipc::TIME_SERIES_LABEL;

use crate::registry::ChannelRegistry;

/// Result of appending one sample vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppendOutcome {
    /// Row appended at this offset.
    Appended { offset: f64 },

    /// Timestamp was earlier than the last row but within the window; dropped.
    OutOfOrder { offset: f64, last: f64 },

    /// Timestamp jumped back by more than the window (source clock reset);
    /// history was cleared and the row starts a new buffer.
    Restarted,
}

/// One device's rolling buffer.
#[derive(Debug, Clone, Default)]
pub struct WindowedBuffer {
    first_timestamp: Option<f64>,
    time: Vec<f64>,
    columns: Vec<(String, Vec<f64>)>,
}

impl WindowedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a sample at `timestamp` would be dropped as out of order.
    pub fn is_out_of_order(&self, timestamp: f64, window: f64) -> bool {
        match (self.first_timestamp, self.time.last()) {
            (Some(first), Some(&last)) => {
                let offset = timestamp - first;
                offset < last && last - offset <= window
            }
            _ => false,
        }
    }

    /// Append one sample vector taken at `timestamp` (seconds).
    ///
    /// `window` only decides whether a backwards jump is a clock reset.
    pub fn append(&mut self, timestamp: f64, values: &[(String, f64)], window: f64) -> AppendOutcome {
        let mut restarted = false;
        if let (Some(first), Some(&last)) = (self.first_timestamp, self.time.last()) {
            let offset = timestamp - first;
            if offset < last {
                if last - offset <= window {
                    return AppendOutcome::OutOfOrder { offset, last };
                }
                self.clear();
                restarted = true;
            }
        }

        let first = *self.first_timestamp.get_or_insert(timestamp);
        let offset = timestamp - first;
        let rows_before = self.time.len();
        self.time.push(offset);

        for (name, value) in values {
            match self.columns.iter_mut().find(|(n, _)| n == name) {
                Some((_, column)) if column.len() == rows_before => column.push(*value),
                // Duplicate channel name within one vector: first value wins.
                Some(_) => {}
                None => {
                    let mut column = vec![f64::NAN; rows_before];
                    column.push(*value);
                    self.columns.push((name.clone(), column));
                }
            }
        }

        let rows = self.time.len();
        for (_, column) in self.columns.iter_mut() {
            if column.len() < rows {
                column.push(f64::NAN);
            }
        }

        if restarted {
            AppendOutcome::Restarted
        } else {
            AppendOutcome::Appended { offset }
        }
    }

    /// Drop every row older than `window` seconds before the newest row.
    ///
    /// Returns the number of rows removed. `first_timestamp` is left alone,
    /// so offsets stay relative to the original first arrival. A column left
    /// holding only `NaN` is dropped unless `registered` says its channel is
    /// still current.
    pub fn trim<F>(&mut self, window: f64, registered: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let (Some(&first), Some(&last)) = (self.time.first(), self.time.last()) else {
            return 0;
        };
        let cutoff = last - window;
        if cutoff <= first {
            return 0;
        }

        // Offsets are non-decreasing, so the cut point is a binary search.
        let index = self.time.partition_point(|&t| t < cutoff);
        self.time.drain(..index);
        for (_, column) in self.columns.iter_mut() {
            column.drain(..index);
        }
        self.columns.retain(|(name, column)| {
            registered(name.as_str()) || column.iter().any(|v| !v.is_nan())
        });
        index
    }

    /// Remove all rows and forget the time origin.
    pub fn clear(&mut self) {
        self.first_timestamp = None;
        self.time.clear();
        self.columns.clear();
    }

    /// Absolute timestamp the time column is relative to.
    pub fn first_timestamp(&self) -> Option<f64> {
        self.first_timestamp
    }

    /// Offsets of the retained rows.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Column of one channel.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_slice())
    }

    /// Channel names that have a column, in creation order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Number of retained rows.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Columns aligned with `labels`.
    ///
    /// The time label maps to the time column; a label with no column maps
    /// to a column of `NaN`.
    pub fn columns_for<'a, I>(&self, labels: I) -> Vec<Vec<f64>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        labels
            .into_iter()
            .map(|label| {
                if label == TIME_SERIES_LABEL {
                    self.time.clone()
                } else {
                    self.column(label)
                        .map(<[f64]>::to_vec)
                        .unwrap_or_else(|| vec![f64::NAN; self.time.len()])
                }
            })
            .collect()
    }
}

/// Buffers of every known device.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffers {
    buffers: HashMap<String, WindowedBuffer>,
}

impl SampleBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer for `device`. Returns false if it already exists.
    pub fn add_device(&mut self, device: &str) -> bool {
        if self.buffers.contains_key(device) {
            return false;
        }
        self.buffers.insert(device.to_string(), WindowedBuffer::new());
        true
    }

    pub fn remove_device(&mut self, device: &str) -> bool {
        self.buffers.remove(device).is_some()
    }

    pub fn contains(&self, device: &str) -> bool {
        self.buffers.contains_key(device)
    }

    /// Append to `device`'s buffer. Returns None for an unknown device.
    pub fn append(
        &mut self,
        device: &str,
        timestamp: f64,
        values: &[(String, f64)],
        window: f64,
    ) -> Option<AppendOutcome> {
        let buffer = self.buffers.get_mut(device)?;
        let outcome = buffer.append(timestamp, values, window);
        match outcome {
            AppendOutcome::OutOfOrder { offset, last } => {
                debug!(device = %device, offset, last, "Dropping out of order sample");
            }
            AppendOutcome::Restarted => {
                warn!(device = %device, timestamp, "Source clock went backwards, restarting buffer");
            }
            AppendOutcome::Appended { .. } => {}
        }
        Some(outcome)
    }

    /// Whether `device` would drop a sample at `timestamp` as out of order.
    pub fn is_out_of_order(&self, device: &str, timestamp: f64, window: f64) -> bool {
        self.buffers
            .get(device)
            .is_some_and(|b| b.is_out_of_order(timestamp, window))
    }

    /// Trim `device`'s buffer to `window` seconds, keeping the columns of
    /// channels `registry` still holds for it.
    pub fn trim(&mut self, device: &str, window: f64, registry: &ChannelRegistry) -> usize {
        let channels = registry.channels(device);
        self.buffers
            .get_mut(device)
            .map(|b| b.trim(window, |name| channels.is_some_and(|c| c.contains(name))))
            .unwrap_or(0)
    }

    pub fn get(&self, device: &str) -> Option<&WindowedBuffer> {
        self.buffers.get(device)
    }
}
