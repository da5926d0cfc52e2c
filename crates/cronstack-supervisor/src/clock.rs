//! Wall-clock abstraction used to evaluate cron schedules.
//!
//! Schedules are computed against calendar time, while waiting is done on
//! tokio's timer. [`SystemClock`] reads the real calendar; [`AnchoredClock`]
//! derives calendar time from tokio's clock, so a runtime started with
//! paused time drives schedules deterministically.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of the current calendar time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Reads `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Calendar time that advances with tokio's clock.
///
/// `now()` returns `base` plus the tokio time elapsed since construction.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    base: DateTime<Utc>,
    anchor: Instant,
}

impl AnchoredClock {
    /// Anchor `base` to the current tokio instant.
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            anchor: Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        // Saturate rather than panic on absurd elapsed values.
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.base + elapsed,
            Err(_) => DateTime::<Utc>::MAX_UTC,
        }
    }
}
