/*!
 * Retire Pool
 *
 * Deferred reclamation of control blocks. A retired entry keeps its PID
 * invalidated (unlookupable but not reusable) and keeps the control block
 * alive until the retire delay has elapsed, so a thread still holding the
 * stale identity observes the invalidation before the slot is reused.
 *
 * When the PID table is full, allocation first reclaims expired entries,
 * then evicts the oldest entry (if it is at least the emergency minimum
 * age), and only then reports failure.
 */

use super::registry::PidRegistry;
use crate::core::clock::Clock;
use crate::core::errors::{RegistryError, RegistryResult};
use crate::core::types::Nanos;
use crate::core::Pid;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
struct Retired<T> {
    pid: Pid,
    marked_at: Nanos,
    retire_at: Nanos,
    _payload: T,
}

/// Time-delayed free list over a [`PidRegistry`]
pub struct RetirePool<T> {
    entries: Mutex<VecDeque<Retired<T>>>,
    registry: Arc<PidRegistry>,
    clock: Arc<dyn Clock>,
    retire_delay: Duration,
    emergency_min_age: Duration,
}

impl<T> RetirePool<T> {
    pub fn new(registry: Arc<PidRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            registry,
            clock,
            retire_delay: crate::core::limits::DEFAULT_RETIRE_DELAY,
            emergency_min_age: crate::core::limits::DEFAULT_EMERGENCY_MIN_AGE,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_retire_delay(mut self, delay: Duration) -> Self {
        self.retire_delay = delay;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_emergency_min_age(mut self, age: Duration) -> Self {
        self.emergency_min_age = age;
        self
    }

    pub fn registry(&self) -> &Arc<PidRegistry> {
        &self.registry
    }

    /// Invalidate `pid` and keep `payload` alive until the retire delay passes
    pub fn mark(&self, pid: Pid, payload: T) {
        if let Err(e) = self.registry.invalidate(pid) {
            warn!(pid = %pid, error = %e, "Retiring a PID the registry does not know");
        }
        let now = self.clock.now_ns();
        self.entries.lock().push_back(Retired {
            pid,
            marked_at: now,
            retire_at: now + self.retire_delay.as_nanos() as Nanos,
            _payload: payload,
        });
        debug!(pid = %pid, "Control block retired");
    }

    /// Free every entry whose retire time has elapsed
    pub fn reclaim_expired(&self) -> usize {
        let now = self.clock.now_ns();
        let expired: Vec<Retired<T>> = {
            let mut entries = self.entries.lock();
            let (expired, kept): (VecDeque<_>, VecDeque<_>) =
                entries.drain(..).partition(|e| e.retire_at <= now);
            *entries = kept;
            expired.into_iter().collect()
        };
        self.release(expired)
    }

    /// Free every entry regardless of age (final teardown)
    pub fn reclaim_all(&self) -> usize {
        let all: Vec<Retired<T>> = self.entries.lock().drain(..).collect();
        self.release(all)
    }

    /// Free the oldest entry if it has at least the emergency minimum age
    pub fn evict_oldest(&self) -> bool {
        let now = self.clock.now_ns();
        let min_age = self.emergency_min_age.as_nanos() as Nanos;
        let victim = {
            let mut entries = self.entries.lock();
            let oldest = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.marked_at)
                .map(|(i, e)| (i, e.marked_at));
            match oldest {
                Some((index, marked_at)) if now.saturating_sub(marked_at) >= min_age => {
                    entries.remove(index)
                }
                _ => None,
            }
        };
        match victim {
            Some(entry) => {
                warn!(pid = %entry.pid, "Evicting retired control block early");
                self.release(vec![entry]) == 1
            }
            None => false,
        }
    }

    /// Allocate a PID, reclaiming retired entries as needed
    pub fn allocate(&self, name: &str) -> RegistryResult<Pid> {
        self.allocate_with(name, PidRegistry::generate)
    }

    /// Like [`allocate`](Self::allocate), but fails with `AlreadyRunning`
    /// while a valid PID is bound to `name`
    pub fn allocate_unique(&self, name: &str) -> RegistryResult<Pid> {
        self.allocate_with(name, PidRegistry::generate_unique)
    }

    fn allocate_with(
        &self,
        name: &str,
        generate: fn(&PidRegistry, &str) -> RegistryResult<Pid>,
    ) -> RegistryResult<Pid> {
        self.reclaim_expired();
        let registry = self.registry.as_ref();
        match generate(registry, name) {
            Ok(pid) => Ok(pid),
            Err(RegistryError::NoFreePid(_)) if self.evict_oldest() => generate(registry, name),
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn release(&self, entries: Vec<Retired<T>>) -> usize {
        let count = entries.len();
        for entry in entries {
            if let Err(e) = self.registry.free(entry.pid) {
                warn!(pid = %entry.pid, error = %e, "Retired PID vanished from registry");
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    fn pool(capacity: usize) -> (RetirePool<()>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let registry = Arc::new(PidRegistry::with_capacity(capacity));
        let pool = RetirePool::new(registry, clock.clone())
            .with_retire_delay(Duration::from_millis(100))
            .with_emergency_min_age(Duration::from_millis(10));
        (pool, clock)
    }

    #[test]
    fn test_mark_invalidates_but_keeps_slot() {
        let (pool, _) = pool(2);
        let pid = pool.allocate("a").unwrap();
        pool.mark(pid, ());
        assert_eq!(pool.registry().lookup_by_name("a"), None);
        assert_eq!(pool.registry().free_slots(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_reclaim_expired_respects_delay() {
        let (pool, clock) = pool(2);
        let pid = pool.allocate("a").unwrap();
        pool.mark(pid, ());
        clock.advance(Duration::from_millis(50));
        assert_eq!(pool.reclaim_expired(), 0);
        clock.advance(Duration::from_millis(50));
        assert_eq!(pool.reclaim_expired(), 1);
        assert_eq!(pool.registry().free_slots(), 2);
    }

    #[test]
    fn test_evict_requires_min_age() {
        let (pool, clock) = pool(1);
        let pid = pool.allocate("a").unwrap();
        pool.mark(pid, ());
        assert!(!pool.evict_oldest());
        clock.advance(Duration::from_millis(10));
        assert!(pool.evict_oldest());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_reclaim_all() {
        let (pool, _) = pool(3);
        for name in ["a", "b", "c"] {
            let pid = pool.allocate(name).unwrap();
            pool.mark(pid, ());
        }
        assert_eq!(pool.reclaim_all(), 3);
        assert_eq!(pool.registry().free_slots(), 3);
    }
}
