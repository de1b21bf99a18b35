//! Multiplexer statistics.
//!
//! Aggregate counters only; nothing here identifies a destination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Counters for one multiplexer instance.
pub struct MuxStats {
    start_time: Instant,
    endpoints_opened: AtomicU64,
    endpoints_closed: AtomicU64,
    dial_failures: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    /// Frames for unknown identifiers or that failed to decode
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl MuxStats {
    /// Create a new stats collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            endpoints_opened: AtomicU64::new(0),
            endpoints_closed: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn increment_opened(&self) {
        self.endpoints_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_closed(&self) {
        self.endpoints_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dial_failures(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame handed to the transport.
    pub fn record_sent(&self, payload_len: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    /// Record a frame taken off the transport.
    pub fn record_received(&self, payload_len: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub fn increment_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Endpoints currently open.
    pub fn active_endpoints(&self) -> u64 {
        let opened = self.endpoints_opened.load(Ordering::Relaxed);
        let closed = self.endpoints_closed.load(Ordering::Relaxed);
        opened.saturating_sub(closed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            endpoints_opened: self.endpoints_opened.load(Ordering::Relaxed),
            endpoints_closed: self.endpoints_closed.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

impl Default for MuxStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all counters at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub endpoints_opened: u64,
    pub endpoints_closed: u64,
    pub dial_failures: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl StatsSnapshot {
    /// Fraction of dial attempts that failed.
    pub fn dial_failure_rate(&self) -> f64 {
        let attempts = self.endpoints_opened + self.dial_failures;
        if attempts == 0 {
            0.0
        } else {
            self.dial_failures as f64 / attempts as f64
        }
    }

    /// Payload throughput in bytes per second.
    pub fn throughput_bps(&self) -> f64 {
        if self.uptime_secs == 0 {
            0.0
        } else {
            (self.bytes_sent + self.bytes_received) as f64 / self.uptime_secs as f64
        }
    }
}
