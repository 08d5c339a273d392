/*!
 * PID Registry
 *
 * Fixed-capacity slot table handing out process identifiers.
 * Each identifier passes valid -> invalidated -> free before its slot is
 * reused, and a reused slot gets a new generation so stale PIDs never
 * alias a newer process.
 *
 * # Performance
 * - A single mutex serializes all operations; the table holds at most
 *   [`MAX_PIDS`] entries so every scan is short.
 */

use crate::core::errors::{RegistryError, RegistryResult};
use crate::core::limits::{MAX_PIDS, MAX_PID_GENERATION};
use crate::core::types::InlineString;
use crate::core::Pid;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Slot {
    pid: Pid,
    name: InlineString,
    valid: bool,
}

#[derive(Debug)]
struct RegistryInner {
    slots: Vec<Option<Slot>>,
    generation: i32,
}

/// Allocates, invalidates, frees and looks up process identifiers
#[derive(Debug)]
pub struct PidRegistry {
    inner: Mutex<RegistryInner>,
}

impl PidRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PIDS)
    }

    /// Registry with fewer slots than [`MAX_PIDS`]; larger requests are clamped
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_PIDS);
        Self {
            inner: Mutex::new(RegistryInner {
                slots: vec![None; capacity],
                generation: 0,
            }),
        }
    }

    /// Bind a fresh PID to `name`
    pub fn generate(&self, name: &str) -> RegistryResult<Pid> {
        self.generate_inner(name, false, false)
    }

    /// Bind a fresh PID to `name` unless a valid PID already carries it.
    ///
    /// The name check and the allocation share one critical section, so two
    /// concurrent logins under the same name cannot both succeed.
    pub fn generate_unique(&self, name: &str) -> RegistryResult<Pid> {
        self.generate_inner(name, false, true)
    }

    /// Same as [`generate`](Self::generate) but tagged with the real-time bit
    pub fn generate_realtime(&self, name: &str) -> RegistryResult<Pid> {
        self.generate_inner(name, true, false)
    }

    fn generate_inner(&self, name: &str, realtime: bool, unique: bool) -> RegistryResult<Pid> {
        let mut inner = self.inner.lock();
        if unique
            && inner
                .slots
                .iter()
                .flatten()
                .any(|s| s.valid && s.name.as_str() == name)
        {
            return Err(RegistryError::AlreadyRunning(name.into()));
        }
        let slot = inner
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| RegistryError::NoFreePid(name.into()))?;

        inner.generation += 1;
        if inner.generation > MAX_PID_GENERATION {
            inner.generation = 1;
        }
        let mut pid = Pid::compose(inner.generation, slot);
        if realtime {
            pid = pid.tagged_realtime();
        }
        inner.slots[slot] = Some(Slot {
            pid,
            name: name.into(),
            valid: true,
        });
        Ok(pid)
    }

    /// Hide `pid` from lookups without releasing its slot
    pub fn invalidate(&self, pid: Pid) -> RegistryResult<()> {
        let mut inner = self.inner.lock();
        match inner.find_mut(pid) {
            Some(slot) => {
                slot.valid = false;
                Ok(())
            }
            None => Err(RegistryError::NotFound(pid.raw())),
        }
    }

    /// Return the slot of `pid` to the free pool
    pub fn free(&self, pid: Pid) -> RegistryResult<()> {
        let mut inner = self.inner.lock();
        let index = inner
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.pid == pid))
            .ok_or(RegistryError::NotFound(pid.raw()))?;
        inner.slots[index] = None;
        Ok(())
    }

    /// First valid PID bound to `name`; invalidated entries are skipped
    pub fn lookup_by_name(&self, name: &str) -> Option<Pid> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .flatten()
            .find(|s| s.valid && s.name.as_str() == name)
            .map(|s| s.pid)
    }

    pub fn is_valid(&self, pid: Pid) -> bool {
        let inner = self.inner.lock();
        inner.slots.iter().flatten().any(|s| s.pid == pid && s.valid)
    }

    pub fn name_of(&self, pid: Pid) -> Option<InlineString> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .flatten()
            .find(|s| s.pid == pid && s.valid)
            .map(|s| s.name.clone())
    }

    pub fn free_slots(&self) -> usize {
        self.inner.lock().slots.iter().filter(|s| s.is_none()).count()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

impl RegistryInner {
    fn find_mut(&mut self, pid: Pid) -> Option<&mut Slot> {
        self.slots.iter_mut().flatten().find(|s| s.pid == pid)
    }
}

impl Default for PidRegistry {
    fn default() -> Self {
        Self::new()
    }
}
