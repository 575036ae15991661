//! Per-endpoint traffic statistics.

use serde::{Deserialize, Serialize};

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    /// Total bytes written
    pub bytes_sent: u64,
    /// Total bytes read
    pub bytes_received: u64,
    /// Writes that accepted at least one byte
    pub writes: u64,
    /// Reads that returned at least one byte
    pub reads: u64,
    /// Writes refused for lack of space
    pub blocked_writes: u64,
    /// Reads that found nothing to return
    pub blocked_reads: u64,
    /// Readiness listener dispatches
    pub events: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful write
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.writes += 1;
    }

    /// Record a successful read
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.reads += 1;
    }

    /// Record a write that would have blocked
    pub fn record_blocked_write(&mut self) {
        self.blocked_writes += 1;
    }

    /// Record a read that would have blocked
    pub fn record_blocked_read(&mut self) {
        self.blocked_reads += 1;
    }

    /// Record a listener dispatch
    pub fn record_event(&mut self) {
        self.events += 1;
    }
}
