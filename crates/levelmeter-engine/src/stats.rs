//! Ingest statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use levelmeter_ipc::IngestStats;

/// Counts frames as they move through the engine.
#[derive(Debug, Default)]
pub struct IngestStatsCollector {
    frames_received: AtomicU64,
    frames_ingested: AtomicU64,
    frames_ignored: AtomicU64,
    errors_reported: AtomicU64,
}

impl IngestStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame arriving from the connection.
    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample appended to a device buffer.
    pub fn record_ingested(&self) {
        self.frames_ingested.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame dropped without error.
    pub fn record_ignored(&self) {
        self.frames_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error handed to the error sink.
    pub fn record_error(&self) {
        self.errors_reported.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current counters.
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            errors_reported: self.errors_reported.load(Ordering::Relaxed),
        }
    }
}
