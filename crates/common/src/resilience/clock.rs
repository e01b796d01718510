//! Time abstraction for deterministic testing
//!
//! Refill accounting, recovery windows, and deadlines all read time
//! through [`Clock`] so tests can advance a [`MockClock`] instead of
//! sleeping. Production code uses [`SystemClock`].

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

/// Trait for time operations used by the resilience components.
///
/// `now()` must be monotonic: wall-clock jumps must never grant or revoke
/// tokens or shorten a recovery window. `system_time()` exists for the few
/// places that legitimately need a wall-clock reading.
pub trait Clock: Send + Sync + 'static {
    /// Current instant (monotonic time).
    fn now(&self) -> Instant;

    /// Current system time (wall clock).
    fn system_time(&self) -> SystemTime;
}

/// Real system clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Controllable clock for deterministic tests.
///
/// Cloned handles share the same elapsed offset, so a test can hold one
/// clone and advance time for a component holding the other.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock anchored at the current instant with zero elapsed
    /// time.
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the clock by `duration` without sleeping.
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the clock by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the elapsed offset to an absolute value.
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Current elapsed offset.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + *self.elapsed.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_mock_clock_starts_at_zero() {
        let clock = MockClock::new();
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));

        clock.advance_millis(500);
        assert_eq!(clock.now().duration_since(start), Duration::from_millis(5500));
    }

    #[test]
    fn test_mock_clock_set_elapsed() {
        let clock = MockClock::new();
        clock.set_elapsed(Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));

        clock.set_elapsed(Duration::from_secs(3));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    /// Clones observe advances made through either handle.
    #[test]
    fn test_mock_clock_clone_shares_offset() {
        let a = MockClock::new();
        a.advance(Duration::from_secs(1));

        let b = a.clone();
        b.advance(Duration::from_secs(2));

        assert_eq!(a.elapsed(), Duration::from_secs(3));
        assert_eq!(b.elapsed(), Duration::from_secs(3));
    }
}
