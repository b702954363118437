//! Time sources for the alert loop.
//!
//! Cooldown arithmetic runs on monotonic offsets (`Timestamp`), never on wall
//! time. Wall time is only used to name snapshots and stamp log lines.

use chrono::NaiveDateTime;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic offset from a clock's origin.
pub type Timestamp = Duration;

pub trait Clock: Send {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Timestamp;

    /// Local wall-clock time.
    fn wall_now(&self) -> NaiveDateTime;
}

/// Process clock backed by `Instant`.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        self.origin.elapsed()
    }

    fn wall_now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Manually advanced clock for tests and replays.
///
/// Clones share the same time, so a test can keep a handle while the pipeline
/// owns another.
#[derive(Clone)]
pub struct ManualClock {
    offset_ms: Arc<AtomicU64>,
    wall_base: NaiveDateTime,
}

impl ManualClock {
    pub fn new(wall_base: NaiveDateTime) -> Self {
        Self {
            offset_ms: Arc::new(AtomicU64::new(0)),
            wall_base,
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.offset_ms.store(at.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(NaiveDateTime::default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }

    fn wall_now(&self) -> NaiveDateTime {
        let offset_ms = self.offset_ms.load(Ordering::SeqCst) as i64;
        self.wall_base + chrono::Duration::milliseconds(offset_ms)
    }
}
