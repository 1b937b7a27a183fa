//! Time sources.
//!
//! Timers in the tangle scheduler read time through a [`Clock`]. Production
//! code uses the wall clock; tests install a [`LabClock`] and advance it by
//! hand so debounce windows are fully deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, Instant};

/// A manually-advanceable clock for deterministic tests.
///
/// All clones share the same offset, so every holder sees the same time.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset_us: Arc<AtomicU64>,
}

impl LabClock {
    /// Create a new lab clock starting at `Instant::now()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the lab clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = delta.as_micros().min(u64::MAX as u128) as u64;
        self.offset_us.fetch_add(us, Ordering::Release);
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Instant {
        let offset = Duration::from_micros(self.offset_us.load(Ordering::Acquire));
        self.epoch + offset
    }

    /// Total time advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_us.load(Ordering::Acquire))
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Time source used by the scheduler.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    /// Real wall-clock time.
    #[default]
    Real,
    /// Deterministic lab clock.
    Lab(LabClock),
}

impl Clock {
    /// Current time according to this source.
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::Real => Instant::now(),
            Self::Lab(clock) => clock.now(),
        }
    }

    /// Whether this is a lab clock.
    #[inline]
    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self, Self::Lab(_))
    }

    /// The underlying lab clock, if any.
    #[must_use]
    pub fn lab(&self) -> Option<&LabClock> {
        match self {
            Self::Lab(clock) => Some(clock),
            Self::Real => None,
        }
    }
}
