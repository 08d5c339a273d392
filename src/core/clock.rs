/*!
 * Clock Abstraction
 * Monotonic time source shared by pacing, the retire pool and termination
 */

use super::types::Nanos;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic nanosecond clock
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin
    fn now_ns(&self) -> Nanos;

    /// Block the calling thread
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Wall clock backed by [`Instant`]
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_ns(&self) -> Nanos {
        self.origin.elapsed().as_nanos() as Nanos
    }
}

/// Hand-driven clock; `sleep` advances time instead of blocking
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ns: Nanos) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ns: Nanos) {
        self.now.store(now_ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> Nanos {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(5);
        clock.sleep(Duration::from_nanos(10));
        assert_eq!(clock.now_ns(), 15);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
