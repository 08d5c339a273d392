/*!
 * Termination Coordinator
 *
 * Global shutdown runs in phases. The init process is asked to stop first;
 * once it is gone the termination flag is raised for every scheduler. Each
 * scheduler recognizes the flag at its own cycle end and only starts its
 * shutdown sweep when all of them have recognized it. A timeout breaks
 * pending barrier rendezvous so a stuck participant cannot block shutdown.
 */

use crate::core::clock::Clock;
use crate::core::types::Nanos;
use crate::core::SchedulerId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Name of the process that is stopped before everything else
pub const INIT_PROCESS_NAME: &str = "init";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPhase {
    Idle,
    /// Waiting for the init process to exit
    WaitInit,
    /// Flag raised, waiting for every scheduler to finish
    WaitAll,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct Deadlines {
    break_at: Nanos,
    hard_at: Nanos,
}

/// What the poller has to do after a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    None,
    BreakBarriers,
    GiveUp,
}

pub struct TerminationCoordinator {
    clock: Arc<dyn Clock>,
    phase: Mutex<TerminationPhase>,
    flag: AtomicBool,
    /// Bit per scheduler id
    expected: AtomicU64,
    recognized: AtomicU64,
    accepted: AtomicBool,
    /// Schedulers parked before their shutdown sweep
    swept: Mutex<u64>,
    sweep_ready: Condvar,
    deadlines: Mutex<Option<Deadlines>>,
    broken: AtomicBool,
}

impl TerminationCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            phase: Mutex::new(TerminationPhase::Idle),
            flag: AtomicBool::new(false),
            expected: AtomicU64::new(0),
            recognized: AtomicU64::new(0),
            accepted: AtomicBool::new(false),
            swept: Mutex::new(0),
            sweep_ready: Condvar::new(),
            deadlines: Mutex::new(None),
            broken: AtomicBool::new(false),
        }
    }

    #[inline]
    fn bit(id: SchedulerId) -> u64 {
        1u64 << (id.0 as u32 % 64)
    }

    /// A scheduler thread that takes part in recognition
    pub fn expect(&self, id: SchedulerId) {
        self.expected.fetch_or(Self::bit(id), Ordering::AcqRel);
    }

    /// A scheduler that finished without the flag (never joins again)
    pub fn forget(&self, id: SchedulerId) {
        self.expected.fetch_and(!Self::bit(id), Ordering::AcqRel);
        self.sweep_ready.notify_all();
    }

    pub fn phase(&self) -> TerminationPhase {
        *self.phase.lock()
    }

    /// Start the sequence; false if it already runs
    pub fn begin(&self, wait_for_init: bool) -> bool {
        let mut phase = self.phase.lock();
        if *phase != TerminationPhase::Idle {
            return false;
        }
        if wait_for_init {
            *phase = TerminationPhase::WaitInit;
        } else {
            *phase = TerminationPhase::WaitAll;
            self.flag.store(true, Ordering::Release);
        }
        true
    }

    /// Init is gone; raise the flag
    pub fn raise(&self) {
        let mut phase = self.phase.lock();
        if *phase == TerminationPhase::WaitInit {
            *phase = TerminationPhase::WaitAll;
            self.flag.store(true, Ordering::Release);
        }
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Record that `id` saw the flag; true once every scheduler has
    pub fn recognize(&self, id: SchedulerId) -> bool {
        self.recognized.fetch_or(Self::bit(id), Ordering::AcqRel);
        let all = self.all_recognized();
        if all {
            self.accepted.store(true, Ordering::Release);
        }
        all
    }

    pub fn all_recognized(&self) -> bool {
        let expected = self.expected.load(Ordering::Acquire);
        self.recognized.load(Ordering::Acquire) & expected == expected
    }

    /// Every scheduler recognized the flag; each one leaves its loop at cycle end
    #[inline]
    pub fn is_accepted(&self) -> bool {
        self.accepted.load(Ordering::Acquire)
    }

    /// Park until every scheduler reached its sweep (or barriers were broken)
    pub fn wait_for_sweep(&self, id: SchedulerId, poll: Duration) {
        let mut swept = self.swept.lock();
        *swept |= Self::bit(id);
        self.sweep_ready.notify_all();
        loop {
            let expected = self.expected.load(Ordering::Acquire);
            if *swept & expected == expected || self.broken.load(Ordering::Acquire) {
                return;
            }
            self.sweep_ready.wait_for(&mut swept, poll);
        }
    }

    /// Arm the timeout: barriers break after half, the hard limit is the full time
    pub fn set_timeout(&self, seconds: u64) {
        let now = self.clock.now_ns();
        let full = Duration::from_secs(seconds).as_nanos() as Nanos;
        *self.deadlines.lock() = Some(Deadlines {
            break_at: now + full / 2,
            hard_at: now + full,
        });
    }

    /// Compare the clock with the armed deadlines
    pub fn escalation(&self) -> Escalation {
        let Some(deadlines) = *self.deadlines.lock() else {
            return Escalation::None;
        };
        let now = self.clock.now_ns();
        if now >= deadlines.hard_at {
            Escalation::GiveUp
        } else if now >= deadlines.break_at && !self.broken.swap(true, Ordering::AcqRel) {
            Escalation::BreakBarriers
        } else {
            Escalation::None
        }
    }

    pub fn finish(&self) {
        *self.phase.lock() = TerminationPhase::Done;
    }
}

impl std::fmt::Debug for TerminationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationCoordinator")
            .field("phase", &self.phase())
            .field("flag", &self.is_requested())
            .field("expected", &self.expected.load(Ordering::Relaxed))
            .field("recognized", &self.recognized.load(Ordering::Relaxed))
            .finish()
    }
}
