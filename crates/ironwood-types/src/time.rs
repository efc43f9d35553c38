//! Millisecond wall clock.
//!
//! Deferred admission, caching-job budgets, and the stuck-transaction
//! monitor all reason in wall-clock milliseconds. Threading a [`Clock`]
//! instead of calling the OS directly keeps those policies testable
//! without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn millis(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn millis(&self) -> u64 {
        // A system clock before 1970 is not a supported deployment.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// A manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `millis`.
    #[must_use]
    pub fn at(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }

    /// Advance the clock by `delta` milliseconds.
    pub fn advance(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at(1000);
        assert_eq!(clock.millis(), 1000);
        clock.advance(500);
        assert_eq!(clock.millis(), 1500);
        clock.set(100);
        assert_eq!(clock.millis(), 100);
    }

    #[test]
    fn system_clock_is_past_2020() {
        // 2020-01-01 in epoch millis.
        assert!(SystemClock.millis() > 1_577_836_800_000);
    }
}
