//! # Clock
//!
//! Time source for thought timestamps.
//!
//! The store never reads wall-clock time directly; it asks its `Clock`.
//! `ManualClock` makes timestamp collisions and orderings reproducible.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of millisecond timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Wall-clock time since the Unix epoch.
///
/// Readings are strictly increasing within one process: two commits in the
/// same millisecond get consecutive timestamps, so their order survives the
/// last-writer-wins fold.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

static LAST_SYSTEM_MILLIS: AtomicU64 = AtomicU64::new(0);

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let previous = LAST_SYSTEM_MILLIS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last.saturating_add(1)))
            })
            .unwrap_or(wall);
        wall.max(previous.saturating_add(1))
    }
}

/// A settable clock. Clones share the same instant.
///
/// A ticking clock advances by its step after every reading, so successive
/// commits never share a timestamp.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    step: u64,
}

impl ManualClock {
    /// Create a clock stopped at `start`.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
            step: 0,
        }
    }

    /// Create a clock at `start` that advances `step` per reading.
    #[must_use]
    pub fn ticking(start: u64, step: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
            step,
        }
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}
