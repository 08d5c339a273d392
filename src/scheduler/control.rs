/*!
 * Scheduler Control
 *
 * Pause, resume and single-step requests for the main scheduler. Requests
 * travel over a channel and are only applied at a cycle boundary, so a
 * pause never interrupts a cycle in progress.
 */

use super::types::{SchedulerShared, SchedulerState};
use crate::core::limits::SCHEDULER_IDLE_POLL;
use flume::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    /// Run exactly this many more cycles, then pause
    Step(u64),
    /// Termination: drop any standing pause
    Cancel,
}

#[derive(Debug, Default)]
struct Flags {
    paused: AtomicBool,
    requested: AtomicU64,
    applied: AtomicU64,
}

/// Sending side, held by the system
#[derive(Debug, Clone)]
pub struct Controller {
    tx: Sender<ControlCommand>,
    flags: Arc<Flags>,
}

/// Receiving side, owned by the main scheduler thread
#[derive(Debug)]
pub struct ControlGate {
    rx: Receiver<ControlCommand>,
    flags: Arc<Flags>,
    steps: Option<u64>,
    cancelled: bool,
}

pub fn channel() -> (Controller, ControlGate) {
    let (tx, rx) = flume::unbounded();
    let flags = Arc::new(Flags::default());
    (
        Controller {
            tx,
            flags: flags.clone(),
        },
        ControlGate {
            rx,
            flags,
            steps: None,
            cancelled: false,
        },
    )
}

impl Controller {
    fn send(&self, command: ControlCommand) {
        self.flags.requested.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(command).is_err() {
            // gate gone: the scheduler has exited
            self.flags.applied.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn pause(&self) {
        self.send(ControlCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(ControlCommand::Resume);
    }

    pub fn step(&self, cycles: u64) {
        self.send(ControlCommand::Step(cycles));
    }

    pub fn cancel(&self) {
        self.send(ControlCommand::Cancel);
    }

    /// Paused at a boundary with every request applied
    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::Acquire)
            && self.flags.applied.load(Ordering::Acquire) == self.flags.requested.load(Ordering::Acquire)
    }
}

impl ControlGate {
    fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Pause if !self.cancelled => {
                self.flags.paused.store(true, Ordering::Release);
                self.steps = None;
            }
            ControlCommand::Pause => {}
            ControlCommand::Resume => {
                self.flags.paused.store(false, Ordering::Release);
                self.steps = None;
            }
            ControlCommand::Step(n) if !self.cancelled => {
                self.flags.paused.store(false, Ordering::Release);
                self.steps = Some(n);
            }
            ControlCommand::Step(_) => {}
            ControlCommand::Cancel => {
                self.cancelled = true;
                self.flags.paused.store(false, Ordering::Release);
                self.steps = None;
            }
        }
        self.flags.applied.fetch_add(1, Ordering::AcqRel);
        debug!(?command, "control request applied");
    }

    /// Block at the start of a cycle while paused
    ///
    /// `idle` runs on every poll while parked so logins keep flowing;
    /// returning true from `stop` ends the wait (termination).
    pub fn pass(
        &mut self,
        shared: &SchedulerShared,
        idle: &mut dyn FnMut(),
        stop: &dyn Fn() -> bool,
    ) {
        let mut parked = false;
        loop {
            while let Ok(command) = self.rx.try_recv() {
                self.apply(command);
            }
            if stop() {
                self.cancelled = true;
                self.flags.paused.store(false, Ordering::Release);
            }
            if !self.flags.paused.load(Ordering::Acquire) {
                match self.steps {
                    Some(0) => {
                        self.steps = None;
                        self.flags.paused.store(true, Ordering::Release);
                        continue;
                    }
                    Some(n) => self.steps = Some(n - 1),
                    None => {}
                }
                if parked {
                    info!(scheduler = %shared.name, cycle = shared.cycle(), "scheduler resumed");
                    shared.set_state(SchedulerState::Running);
                }
                return;
            }
            if !parked {
                parked = true;
                info!(scheduler = %shared.name, cycle = shared.cycle(), "scheduler paused");
                shared.set_state(SchedulerState::IsStopped);
            }
            idle();
            match self.rx.recv_timeout(SCHEDULER_IDLE_POLL) {
                Ok(command) => self.apply(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.flags.paused.store(false, Ordering::Release);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierSet;
    use crate::core::SchedulerId;

    fn shared() -> SchedulerShared {
        SchedulerShared::new(SchedulerId::MAIN, "main", BarrierSet::empty(), false)
    }

    #[test]
    fn test_step_runs_exact_cycles() {
        let (ctl, mut gate) = channel();
        let shared = shared();
        ctl.step(2);
        gate.pass(&shared, &mut || {}, &|| false);
        assert!(!ctl.is_paused());
        gate.pass(&shared, &mut || {}, &|| false);
        assert!(!ctl.is_paused());

        // third boundary parks; release it from another thread
        let handle = {
            let ctl = ctl.clone();
            std::thread::spawn(move || {
                while !ctl.is_paused() {
                    std::thread::sleep(SCHEDULER_IDLE_POLL);
                }
                ctl.resume();
            })
        };
        gate.pass(&shared, &mut || {}, &|| false);
        handle.join().unwrap();
        assert_eq!(shared.state(), SchedulerState::Running);
    }

    #[test]
    fn test_cancel_drops_pause() {
        let (ctl, mut gate) = channel();
        let shared = shared();
        ctl.pause();
        ctl.cancel();
        gate.pass(&shared, &mut || {}, &|| false);
        ctl.pause();
        gate.pass(&shared, &mut || {}, &|| false);
        assert!(!ctl.is_paused());
    }

    #[test]
    fn test_stop_releases_parked_gate() {
        let (ctl, mut gate) = channel();
        let shared = shared();
        ctl.pause();
        let mut polls = 0;
        let stop = std::cell::Cell::new(false);
        gate.pass(
            &shared,
            &mut || {
                polls += 1;
                if polls == 3 {
                    stop.set(true);
                }
            },
            &|| stop.get(),
        );
        assert!(polls >= 3);
    }
}
