//! Time source for expiry sweeps and memoization windows.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the current wall-clock time as epoch milliseconds.
///
/// Every expiry cutoff and memo window in the crate is measured against a
/// shared `Clock`, so tests can substitute [`ManualClock`] and move time
/// explicitly instead of sleeping.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to.
pub struct ManualClock {
    current: AtomicI64,
}

impl ManualClock {
    pub fn new(initial_millis: i64) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicI64::new(initial_millis),
        })
    }

    /// Advance time by a number of milliseconds.
    pub fn advance(&self, millis: i64) {
        self.current.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value.
    pub fn set(&self, millis: i64) {
        self.current.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }
}
