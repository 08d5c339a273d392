/*!
 * Barriers
 *
 * Named multi-participant rendezvous points shared by schedulers and
 * processes. Every walk happens in two passes: pass 0 announces arrival,
 * pass 1 blocks (for signal-and-wait participants) until every connected
 * participant of the same generation has arrived.
 *
 * A blocked scheduler can still service its login queue: login wakeups
 * interrupt the wait, run a callback with the barrier unlocked, then resume
 * waiting. `break_all` releases every waiter permanently and is used by the
 * termination timeout.
 */

use crate::core::config::BarrierNames;
use crate::core::types::InlineString;
use crate::core::{Pid, SchedulerId};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Who takes part in a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Participant {
    Scheduler(SchedulerId),
    Process(Pid),
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Participant::Scheduler(id) => write!(f, "scheduler {}", id),
            Participant::Process(pid) => write!(f, "process {}", pid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierMode {
    /// Counts toward release but never blocks
    SignalOnly,
    SignalAndWait,
}

/// Where a barrier sits relative to the guarded work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Before,
    Behind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Released,
    Broken,
    NotConnected,
}

#[derive(Debug, Default)]
struct BarrierState {
    members: HashMap<Participant, BarrierMode>,
    arrived: HashSet<Participant>,
    pending: HashMap<Participant, u64>,
    generation: u64,
    broken: bool,
    login_epoch: u64,
}

/// A single named rendezvous point
#[derive(Debug)]
pub struct Barrier {
    name: InlineString,
    wait_if_alone: bool,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl Barrier {
    pub fn new(name: &str, wait_if_alone: bool) -> Self {
        Self {
            name: name.into(),
            wait_if_alone,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connect(&self, participant: Participant, mode: BarrierMode) {
        let mut st = self.state.lock();
        st.members.insert(participant, mode);
        debug!(barrier = %self.name, %participant, ?mode, "Connected to barrier");
    }

    /// Remove a participant; waiters blocked only on it are released
    pub fn disconnect(&self, participant: Participant) {
        let mut st = self.state.lock();
        if st.members.remove(&participant).is_none() {
            return;
        }
        st.arrived.remove(&participant);
        st.pending.remove(&participant);
        debug!(barrier = %self.name, %participant, "Disconnected from barrier");
        self.try_release(&mut st);
        // Wake a waiter that was itself disconnected
        self.released.notify_all();
    }

    /// Pass 0: announce arrival for the current generation
    pub fn arrive(&self, participant: Participant) {
        let mut st = self.state.lock();
        if st.broken || !st.members.contains_key(&participant) {
            return;
        }
        let generation = st.generation;
        st.arrived.insert(participant);
        st.pending.insert(participant, generation);
        self.try_release(&mut st);
    }

    /// Pass 1: block until the generation announced in pass 0 is released
    pub fn wait(&self, participant: Participant, on_wakeup: &mut dyn FnMut()) -> WaitOutcome {
        let mut st = self.state.lock();
        let Some(mode) = st.members.get(&participant).copied() else {
            return WaitOutcome::NotConnected;
        };
        let Some(generation) = st.pending.remove(&participant) else {
            return WaitOutcome::Released;
        };
        if mode == BarrierMode::SignalOnly {
            return WaitOutcome::Released;
        }
        let mut seen_login = st.login_epoch;
        loop {
            if st.broken {
                return WaitOutcome::Broken;
            }
            if st.generation != generation {
                return WaitOutcome::Released;
            }
            if !st.members.contains_key(&participant) {
                return WaitOutcome::NotConnected;
            }
            self.released.wait(&mut st);
            if st.login_epoch != seen_login {
                seen_login = st.login_epoch;
                MutexGuard::unlocked(&mut st, || on_wakeup());
            }
        }
    }

    /// Run one pass of a walk
    pub fn walk(&self, participant: Participant, pass: u8, on_wakeup: &mut dyn FnMut()) -> WaitOutcome {
        if pass == 0 {
            self.arrive(participant);
            WaitOutcome::Released
        } else {
            self.wait(participant, on_wakeup)
        }
    }

    /// Release every current and future waiter
    pub fn break_all(&self) {
        let mut st = self.state.lock();
        if !st.broken {
            st.broken = true;
            warn!(barrier = %self.name, waiting = st.pending.len(), "Barrier force-broken");
        }
        self.released.notify_all();
    }

    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Interrupt waiters so they can service logins
    pub fn wake_for_login(&self) {
        let mut st = self.state.lock();
        st.login_epoch += 1;
        self.released.notify_all();
    }

    pub fn participants(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn try_release(&self, st: &mut BarrierState) {
        if st.members.is_empty() {
            return;
        }
        if st.members.len() == 1 && self.wait_if_alone {
            return;
        }
        if st.members.keys().all(|m| st.arrived.contains(m)) {
            st.generation += 1;
            st.arrived.clear();
            self.released.notify_all();
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// All barriers of the system, looked up by name
#[derive(Debug, Default)]
pub struct BarrierRegistry {
    barriers: RwLock<HashMap<String, Arc<Barrier>>>,
}

impl BarrierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a barrier explicitly; returns the existing one if the name is taken
    pub fn add(&self, name: &str, wait_if_alone: bool) -> Arc<Barrier> {
        self.barriers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Barrier::new(name, wait_if_alone)))
            .clone()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<Barrier> {
        if let Some(b) = self.get(name) {
            return b;
        }
        self.add(name, false)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Barrier>> {
        self.barriers.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Barrier>> {
        self.barriers.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.barriers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn break_all(&self) {
        for barrier in self.barriers.read().values() {
            barrier.break_all();
        }
    }

    pub fn wake_all_for_login(&self) {
        for barrier in self.barriers.read().values() {
            barrier.wake_for_login();
        }
    }
}

// ============================================================================
// Barrier Sets
// ============================================================================

/// Barriers a participant walks before and behind its guarded work
#[derive(Debug, Default, Clone)]
pub struct BarrierSet {
    before: Vec<(Arc<Barrier>, BarrierMode)>,
    behind: Vec<(Arc<Barrier>, BarrierMode)>,
}

impl BarrierSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve configured names, creating barriers on first use
    pub fn resolve(names: &BarrierNames, registry: &BarrierRegistry) -> Self {
        let pick = |list: &[String], mode| -> Vec<(Arc<Barrier>, BarrierMode)> {
            list.iter()
                .map(|n| (registry.get_or_create(n), mode))
                .collect()
        };
        let mut before = pick(&names.before_signal_only, BarrierMode::SignalOnly);
        before.extend(pick(&names.before_signal_and_wait, BarrierMode::SignalAndWait));
        let mut behind = pick(&names.behind_signal_only, BarrierMode::SignalOnly);
        behind.extend(pick(&names.behind_signal_and_wait, BarrierMode::SignalAndWait));
        Self { before, behind }
    }

    pub fn connect(&self, participant: Participant) {
        for (barrier, mode) in self.before.iter().chain(self.behind.iter()) {
            barrier.connect(participant, *mode);
        }
    }

    pub fn disconnect(&self, participant: Participant) {
        for (barrier, _) in self.before.iter().chain(self.behind.iter()) {
            barrier.disconnect(participant);
        }
    }

    pub fn walk(
        &self,
        position: Position,
        participant: Participant,
        pass: u8,
        on_wakeup: &mut dyn FnMut(),
    ) {
        let list = match position {
            Position::Before => &self.before,
            Position::Behind => &self.behind,
        };
        for (barrier, _) in list {
            barrier.walk(participant, pass, on_wakeup);
        }
    }

    /// Walk one named barrier (loop-out points)
    pub fn walk_named(
        &self,
        name: &str,
        position: Position,
        participant: Participant,
        pass: u8,
    ) -> Option<WaitOutcome> {
        let list = match position {
            Position::Before => &self.before,
            Position::Behind => &self.behind,
        };
        list.iter()
            .find(|(b, _)| b.name() == name)
            .map(|(b, _)| b.walk(participant, pass, &mut || {}))
    }

    pub fn has_before(&self) -> bool {
        !self.before.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.behind.is_empty()
    }
}

/// Barrier memberships of one process
#[derive(Debug, Default, Clone)]
pub struct ProcessBarriers {
    /// Walked around every cycle of the process
    pub cycle: BarrierSet,
    /// Walked on explicit loop-out requests from the worker
    pub loop_out: BarrierSet,
}

impl ProcessBarriers {
    pub fn resolve(cycle: &BarrierNames, loop_out: &BarrierNames, registry: &BarrierRegistry) -> Self {
        Self {
            cycle: BarrierSet::resolve(cycle, registry),
            loop_out: BarrierSet::resolve(loop_out, registry),
        }
    }

    /// Connect to every barrier; done when the process enters a list
    pub fn activate(&self, pid: Pid) {
        self.cycle.connect(Participant::Process(pid));
        self.loop_out.connect(Participant::Process(pid));
    }

    pub fn disconnect_all(&self, pid: Pid) {
        self.cycle.disconnect(Participant::Process(pid));
        self.loop_out.disconnect(Participant::Process(pid));
    }

    pub fn walk(&self, position: Position, pid: Pid, pass: u8) {
        self.cycle
            .walk(position, Participant::Process(pid), pass, &mut || {});
    }

    /// All four passes without doing work in between
    pub fn walk_through(&self, pid: Pid) {
        self.walk(Position::Before, pid, 0);
        self.walk(Position::Before, pid, 1);
        self.walk(Position::Behind, pid, 0);
        self.walk(Position::Behind, pid, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    const A: Participant = Participant::Scheduler(SchedulerId(0));
    const B: Participant = Participant::Scheduler(SchedulerId(1));

    #[test]
    fn test_single_participant_passes() {
        let barrier = Barrier::new("b", false);
        barrier.connect(A, BarrierMode::SignalAndWait);
        barrier.arrive(A);
        assert_eq!(barrier.wait(A, &mut || {}), WaitOutcome::Released);
        assert_eq!(barrier.generation(), 1);
    }

    #[test]
    fn test_two_participants_rendezvous() {
        let barrier = Arc::new(Barrier::new("b", false));
        barrier.connect(A, BarrierMode::SignalAndWait);
        barrier.connect(B, BarrierMode::SignalAndWait);

        let done = Arc::new(AtomicBool::new(false));
        let (b2, d2) = (barrier.clone(), done.clone());
        let handle = thread::spawn(move || {
            b2.arrive(A);
            let outcome = b2.wait(A, &mut || {});
            d2.store(true, Ordering::SeqCst);
            outcome
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        barrier.arrive(B);
        assert_eq!(handle.join().unwrap(), WaitOutcome::Released);
        assert_eq!(barrier.wait(B, &mut || {}), WaitOutcome::Released);
    }

    #[test]
    fn test_signal_only_never_blocks() {
        let barrier = Barrier::new("b", false);
        barrier.connect(A, BarrierMode::SignalOnly);
        barrier.connect(B, BarrierMode::SignalAndWait);
        barrier.arrive(A);
        assert_eq!(barrier.wait(A, &mut || {}), WaitOutcome::Released);
        assert_eq!(barrier.generation(), 0);
    }

    #[test]
    fn test_break_releases_waiter() {
        let barrier = Arc::new(Barrier::new("b", false));
        barrier.connect(A, BarrierMode::SignalAndWait);
        barrier.connect(B, BarrierMode::SignalAndWait);
        let b2 = barrier.clone();
        let handle = thread::spawn(move || {
            b2.arrive(A);
            b2.wait(A, &mut || {})
        });
        thread::sleep(Duration::from_millis(20));
        barrier.break_all();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Broken);
    }

    #[test]
    fn test_disconnect_releases_others() {
        let barrier = Arc::new(Barrier::new("b", false));
        barrier.connect(A, BarrierMode::SignalAndWait);
        barrier.connect(B, BarrierMode::SignalAndWait);
        let b2 = barrier.clone();
        let handle = thread::spawn(move || {
            b2.arrive(A);
            b2.wait(A, &mut || {})
        });
        thread::sleep(Duration::from_millis(20));
        barrier.disconnect(B);
        assert_eq!(handle.join().unwrap(), WaitOutcome::Released);
    }

    #[test]
    fn test_login_wakeup_runs_callback() {
        let barrier = Arc::new(Barrier::new("b", false));
        barrier.connect(A, BarrierMode::SignalAndWait);
        barrier.connect(B, BarrierMode::SignalAndWait);
        let b2 = barrier.clone();
        let handle = thread::spawn(move || {
            let mut calls = 0;
            b2.arrive(A);
            let outcome = b2.wait(A, &mut || calls += 1);
            (outcome, calls)
        });
        thread::sleep(Duration::from_millis(20));
        barrier.wake_for_login();
        thread::sleep(Duration::from_millis(20));
        barrier.arrive(B);
        let (outcome, calls) = handle.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Released);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_barrier_set_resolve() {
        let registry = BarrierRegistry::new();
        let names = BarrierNames {
            before_signal_and_wait: vec!["sync".into()],
            behind_signal_only: vec!["trace".into()],
            ..BarrierNames::default()
        };
        let set = BarrierSet::resolve(&names, &registry);
        assert!(set.has_before());
        assert_eq!(registry.names(), vec!["sync".to_string(), "trace".to_string()]);
        set.connect(A);
        assert_eq!(registry.get("sync").unwrap().participants(), 1);
        set.disconnect(A);
        assert_eq!(registry.get("trace").unwrap().participants(), 0);
    }
}
