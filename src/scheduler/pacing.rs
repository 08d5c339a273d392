/*!
 * Realtime Pacing
 *
 * The main scheduler compares its simulated time against the wall clock.
 * When simulation runs ahead by more than one period it sleeps (or spins)
 * the difference away; when it falls behind by more than one period the
 * offset is silently resynchronized instead of catching up in a burst.
 */

use crate::core::clock::Clock;
use crate::core::limits::REALTIME_FACTOR_FILTER;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Filtered ratio of simulated to wall time, readable from any thread
#[derive(Debug)]
pub struct RealtimeFactor {
    bits: AtomicU64,
}

impl RealtimeFactor {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for RealtimeFactor {
    fn default() -> Self {
        Self::new()
    }
}

/// Pacing state owned by the main scheduler thread
pub struct Pacer {
    clock: Arc<dyn Clock>,
    factor: Arc<RealtimeFactor>,
    period_ns: u64,
    dont_call_sleep: bool,
    was_enabled: bool,
    /// simulated minus wall time at the last resync
    offset_ns: i128,
    last_wall_ns: Option<u64>,
    filtered_ns: f64,
}

impl Pacer {
    pub fn new(clock: Arc<dyn Clock>, factor: Arc<RealtimeFactor>, period_ns: u64) -> Self {
        Self {
            clock,
            factor,
            period_ns: period_ns.max(1),
            dont_call_sleep: false,
            was_enabled: false,
            offset_ns: 0,
            last_wall_ns: None,
            filtered_ns: period_ns.max(1) as f64,
        }
    }

    /// Spin instead of sleeping
    #[inline]
    #[must_use]
    pub fn with_busy_wait(mut self, enabled: bool) -> Self {
        self.dont_call_sleep = enabled;
        self
    }

    #[inline]
    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    /// Wait until `sim_ns` is due; the factor is updated even when disabled
    pub fn pace(&mut self, sim_ns: u64, enabled: bool) {
        if enabled {
            self.wait_until_due(sim_ns);
        }
        self.was_enabled = enabled;
        self.update_factor();
    }

    fn wait_until_due(&mut self, sim_ns: u64) {
        let period = self.period_ns as i128;
        let sim = sim_ns as i128;
        if !self.was_enabled {
            self.offset_ns = sim - self.clock.now_ns() as i128;
        }
        loop {
            let diff = sim - (self.offset_ns + self.clock.now_ns() as i128);
            if diff > period {
                if self.dont_call_sleep {
                    std::hint::spin_loop();
                    continue;
                }
                // millisecond granularity, like a plain OS sleep
                let ms = (diff / 1_000_000) as u64;
                trace!(ahead_ns = diff as i64, "pacing sleep");
                self.clock.sleep(Duration::from_millis(ms));
            } else if diff < -period {
                debug!(behind_ns = -diff as i64, "simulation behind wall clock, resyncing");
                self.offset_ns = sim - self.clock.now_ns() as i128;
            }
            break;
        }
    }

    fn update_factor(&mut self) {
        let now = self.clock.now_ns();
        if let Some(last) = self.last_wall_ns {
            let measured = now.saturating_sub(last) as f64;
            self.filtered_ns =
                self.filtered_ns * (1.0 - REALTIME_FACTOR_FILTER) + measured * REALTIME_FACTOR_FILTER;
            if self.filtered_ns > 0.0 {
                self.factor.set(self.period_ns as f64 / self.filtered_ns);
            }
        }
        self.last_wall_ns = Some(now);
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("period_ns", &self.period_ns)
            .field("dont_call_sleep", &self.dont_call_sleep)
            .field("offset_ns", &self.offset_ns)
            .finish_non_exhaustive()
    }
}
