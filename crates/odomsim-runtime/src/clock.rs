//! Time sources for the odometry node.
//!
//! The estimator only ever sees [`Stamp`]s; where they come from is decided
//! here.  Production uses [`SteadyClock`]; tests and offline simulation use
//! [`ManualClock`] to step time deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use odomsim_types::Stamp;

/// Anything that can report the current monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Stamp;
}

/// Monotonic clock counting from its own construction.
#[derive(Debug, Clone, Copy)]
pub struct SteadyClock {
    origin: Instant,
}

impl SteadyClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SteadyClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SteadyClock {
    fn now(&self) -> Stamp {
        let nanos = self.origin.elapsed().as_nanos();
        Stamp::from_nanos(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}

/// A clock that only moves when told to.
///
/// Can be set backwards, which is how tests exercise the estimator's
/// non-advancing-time guard.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Stamp) -> Self {
        Self {
            nanos: AtomicI64::new(start.nanos),
        }
    }

    pub fn set(&self, stamp: Stamp) {
        self.nanos.store(stamp.nanos, Ordering::SeqCst);
    }

    /// Move forward by `secs` (backward when negative) and return the new
    /// time.
    pub fn advance_secs(&self, secs: f64) -> Stamp {
        let delta = Stamp::ZERO.offset_secs(secs).nanos;
        let prev = self.nanos.fetch_add(delta, Ordering::SeqCst);
        Stamp::from_nanos(prev + delta)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Stamp {
        Stamp::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}
