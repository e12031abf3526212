//! Relay statistics
//!
//! Counters are incremented through 64-bit atomic adds on the live window.
//! A ticker rotates the live window with the previous one, so `/stats`
//! reads a stable snapshot of the last interval. Snapshot reads tolerate
//! per-counter tearing; counters are monotone within a window.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Interval between snapshot rotations
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// One window of relay counters
#[derive(Debug, Default)]
pub struct Statistics {
    pub query_requests: AtomicI64,
    pub query_requests_fail: AtomicI64,
    pub write_requests: AtomicI64,
    pub write_requests_fail: AtomicI64,
    pub ping_requests: AtomicI64,
    pub ping_requests_fail: AtomicI64,
    pub points_written: AtomicI64,
    pub points_written_fail: AtomicI64,
    pub write_request_duration: AtomicI64,
    pub query_request_duration: AtomicI64,
}

impl Statistics {
    fn reset(&self) {
        self.query_requests.store(0, Ordering::Relaxed);
        self.query_requests_fail.store(0, Ordering::Relaxed);
        self.write_requests.store(0, Ordering::Relaxed);
        self.write_requests_fail.store(0, Ordering::Relaxed);
        self.ping_requests.store(0, Ordering::Relaxed);
        self.ping_requests_fail.store(0, Ordering::Relaxed);
        self.points_written.store(0, Ordering::Relaxed);
        self.points_written_fail.store(0, Ordering::Relaxed);
        self.write_request_duration.store(0, Ordering::Relaxed);
        self.query_request_duration.store(0, Ordering::Relaxed);
    }
}

/// Live/previous counter pair with interval rotation
pub struct RelayStats {
    live: RwLock<Arc<Statistics>>,
    snapshot: RwLock<Arc<Statistics>>,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            live: RwLock::new(Arc::new(Statistics::default())),
            snapshot: RwLock::new(Arc::new(Statistics::default())),
        }
    }

    /// Window currently receiving increments
    pub fn live(&self) -> Arc<Statistics> {
        self.live.read().clone()
    }

    /// Previous interval, read out at `/stats`
    pub fn snapshot(&self) -> Arc<Statistics> {
        self.snapshot.read().clone()
    }

    /// Swap the live window with the zeroed previous one
    pub fn rotate(&self) {
        let mut live = self.live.write();
        let mut snapshot = self.snapshot.write();
        snapshot.reset();
        std::mem::swap(&mut *live, &mut *snapshot);
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}
