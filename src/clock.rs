//! Time source
//!
//! All hotness decisions read time through [`Clock`] so tests can drive
//! observation windows deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current time in milliseconds
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start` milliseconds
    pub fn new(start: Timestamp) -> Self {
        Self {
            now_ms: AtomicU64::new(start),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, now: Timestamp) {
        self.now_ms.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Elapsed seconds between two timestamps, saturating at zero
pub fn seconds_between(earlier: Timestamp, later: Timestamp) -> f32 {
    later.saturating_sub(earlier) as f32 / 1000.0
}
