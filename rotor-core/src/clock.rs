//! Clock abstraction
//!
//! All staleness and timeout math in the engine is wall-clock based and
//! goes through this trait, so tests can drive time explicitly. Clock
//! skew between machines is out of scope: the engine assumes a single
//! host or a clock-synchronized fleet.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in microseconds since the unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in microseconds.
    fn now_micros(&self) -> u64;

    /// Current time in fractional seconds, derived from [`Clock::now_micros`].
    fn now_secs(&self) -> f64 {
        self.now_micros() as f64 / 1_000_000.0
    }
}

/// Clock backed by the OS wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests.
///
/// Cloning shares the underlying instant, so a test can advance time
/// while a loop elsewhere observes it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock positioned at the given microsecond instant.
    pub fn at_micros(micros: u64) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(micros)),
        }
    }

    /// Creates a clock positioned at the given second instant.
    pub fn at_secs(secs: u64) -> Self {
        Self::at_micros(secs * 1_000_000)
    }

    /// Moves the clock forward.
    pub fn advance_micros(&self, micros: u64) {
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }

    /// Moves the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance_micros(secs * 1_000_000);
    }

    /// Repositions the clock at an absolute microsecond instant.
    pub fn set_micros(&self, micros: u64) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::at_secs(10);
        let observer = clock.clone();

        clock.advance_secs(5);

        assert_eq!(observer.now_micros(), 15_000_000);
        assert!((observer.now_secs() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(b >= a);
    }
}
