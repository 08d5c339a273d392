/*!
 * Scheduler Engine
 *
 * The loop one scheduler thread runs: pick up logins, walk the cycle-start
 * barriers, advance time, visit every process in priority order, walk the
 * cycle-end barriers and check for termination. Processes are driven through
 * their state machine here and nowhere else.
 */

use super::control::ControlGate;
use super::pacing::Pacer;
use super::runtime::Runtime;
use super::types::{SchedulerShared, SchedulerState};
use crate::barrier::Position;
use crate::core::limits::SCHEDULER_IDLE_POLL;
use crate::ipc::call::{exchange, Exchange};
use crate::ipc::dispatch::DispatchContext;
use crate::ipc::wire::{Phase, PhaseCall, ReplyBody, Request};
use crate::process::{
    lock_group_blocking, HookSide, InternalProcess, KillMode, PhaseContext, ProcessBody,
    ProcessState, Tcb,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, debug_span, error, info, info_span, warn};

/// How a phase ended for the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseResult {
    Done(i32),
    Kill(KillMode),
}

/// Owns one scheduler thread
pub struct Engine {
    rt: Arc<Runtime>,
    shared: Arc<SchedulerShared>,
    pacer: Option<Pacer>,
    gate: Option<ControlGate>,
}

impl Engine {
    pub fn new(rt: Arc<Runtime>, shared: Arc<SchedulerShared>) -> Self {
        Self {
            rt,
            shared,
            pacer: None,
            gate: None,
        }
    }

    /// Realtime pacing (main scheduler only)
    #[inline]
    #[must_use]
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = Some(pacer);
        self
    }

    /// Pause/step control (main scheduler only)
    #[inline]
    #[must_use]
    pub fn with_gate(mut self, gate: ControlGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Thread body: cycle until termination is accepted, then sweep
    pub fn run(mut self) {
        let span = info_span!("scheduler", scheduler = %self.shared.name);
        let _entered = span.enter();

        self.shared.set_state(SchedulerState::Running);
        info!(id = %self.shared.id, "scheduler running");

        while !self.cycle() {}

        self.sweep();
        info!(cycle = self.shared.cycle(), "scheduler terminated");
    }

    /// One full cycle; true once every scheduler accepted termination
    fn cycle(&mut self) -> bool {
        let driver = Driver {
            rt: &self.rt,
            shared: &self.shared,
        };
        let shared = driver.shared;
        let me = shared.participant();
        let config = driver.rt.config.get();

        if let Some(gate) = self.gate.as_mut() {
            gate.pass(shared, &mut || driver.admit_logins(), &|| {
                driver.rt.termination.is_requested()
            });
        }

        let has_before = shared.barriers.has_before();
        shared.barriers.walk(Position::Before, me, 0, &mut || driver.admit_logins());
        if has_before {
            driver.termination_point();
        }
        let cycle = shared.advance(config.scheduler.period_ns);
        shared.barriers.walk(Position::Before, me, 1, &mut || driver.admit_logins());

        if let Some(pacer) = self.pacer.as_mut() {
            pacer.pace(shared.sim_time_ns(), config.scheduler.not_faster_than_realtime);
        }

        let processes = shared.list.lock().snapshot();
        for tcb in &processes {
            driver.visit(tcb, cycle);
        }

        shared.barriers.walk(Position::Behind, me, 0, &mut || driver.admit_logins());
        if !has_before {
            driver.termination_point();
        }
        shared.barriers.walk(Position::Behind, me, 1, &mut || driver.admit_logins());

        if shared.id.is_main() {
            driver.rt.pool.reclaim_expired();
        } else if processes.is_empty() && shared.barriers.is_empty() {
            // nothing drives this scheduler; do not spin
            driver.rt.clock.sleep(SCHEDULER_IDLE_POLL);
        }

        driver.rt.termination.is_accepted()
    }

    /// Final pass: wait for every scheduler, terminate all processes, disconnect
    fn sweep(&mut self) {
        let driver = Driver {
            rt: &self.rt,
            shared: &self.shared,
        };
        let shared = driver.shared;
        let me = shared.participant();

        shared.set_state(SchedulerState::Terminating);
        driver.rt.termination.wait_for_sweep(shared.id, SCHEDULER_IDLE_POLL);

        shared.barriers.walk(Position::Before, me, 0, &mut || {});
        let cycle = shared.advance(driver.rt.config.get().scheduler.period_ns);
        shared.barriers.walk(Position::Before, me, 1, &mut || {});

        let processes = shared.list.lock().snapshot();
        for tcb in &processes {
            driver.finish(tcb, cycle);
        }
        // queued but never admitted
        for tcb in shared.logins.drain() {
            driver.rt.kill(&tcb, KillMode::WithNotice);
        }

        shared.barriers.walk(Position::Behind, me, 0, &mut || {});
        shared.barriers.walk(Position::Behind, me, 1, &mut || {});
        shared.barriers.disconnect(me);
        shared.set_state(SchedulerState::IsTerminated);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.shared)
            .field("paced", &self.pacer.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Process Driving
// ============================================================================

/// Borrowed view used while a cycle runs
#[derive(Clone, Copy)]
struct Driver<'a> {
    rt: &'a Runtime,
    shared: &'a SchedulerShared,
}

impl<'a> Driver<'a> {
    /// Move queued processes into the list
    ///
    /// Unless reference and init get separate cycles, both run right here,
    /// without barrier walks.
    fn admit_logins(&self) {
        let queued = self.shared.logins.drain();
        if queued.is_empty() {
            return;
        }
        let separate = self.rt.config.get().scheduler.separate_cycles_for_ref_and_init;
        let cycle = self.shared.cycle();
        for tcb in queued {
            tcb.barriers.activate(tcb.pid);
            self.shared.list.lock().insert(tcb.clone());
            if tcb.is_external() {
                tcb.transition(ProcessState::Login, ProcessState::Reference);
            }
            info!(pid = %tcb.pid, name = %tcb.name, "process joined scheduler");
            if separate {
                continue;
            }
            let mut outcome = PhaseResult::Done(0);
            if tcb.is_external() {
                outcome = self.reference(&tcb, cycle, false);
            }
            if outcome == PhaseResult::Done(0) && tcb.state() == Ok(ProcessState::Init) {
                outcome = self.init(&tcb, cycle, false);
            }
            if let PhaseResult::Kill(mode) = outcome {
                self.rt.kill(&tcb, mode);
            }
        }
    }

    /// Recognize a pending termination, otherwise pick up logins
    fn termination_point(&self) {
        if self.rt.termination.is_requested() {
            if self.rt.termination.recognize(self.shared.id) {
                debug!("all schedulers recognized termination");
            }
        } else {
            self.admit_logins();
        }
    }

    fn visit(&self, tcb: &Arc<Tcb>, cycle: u64) {
        if let Some(mode) = tcb.take_kill_request() {
            self.rt.kill(tcb, mode);
            return;
        }
        let pid = tcb.pid;
        let outcome = match tcb.state() {
            Ok(ProcessState::Active) => {
                if tcb.tick() {
                    self.run_phase(tcb, Phase::Cyclic, cycle, true)
                } else {
                    // not due, but barrier counts must stay right
                    tcb.barriers.walk_through(pid);
                    PhaseResult::Done(0)
                }
            }
            Ok(ProcessState::Sleep | ProcessState::NonSleep | ProcessState::Login) => {
                tcb.barriers.walk_through(pid);
                PhaseResult::Done(0)
            }
            Ok(ProcessState::Reference) => self.reference(tcb, cycle, true),
            Ok(ProcessState::Init) => self.init(tcb, cycle, true),
            Ok(ProcessState::WaitForCycleEnd) => {
                tcb.barriers.walk(Position::Before, pid, 0);
                tcb.barriers.walk(Position::Before, pid, 1);
                tcb.transition(ProcessState::WaitForCycleEnd, ProcessState::Terminate);
                debug!(pid = %pid, "termination reached cycle end");
                tcb.barriers.walk(Position::Behind, pid, 0);
                tcb.barriers.walk(Position::Behind, pid, 1);
                PhaseResult::Done(0)
            }
            Ok(ProcessState::Terminate) => {
                let mode = match self.run_phase(tcb, Phase::Terminate, cycle, true) {
                    PhaseResult::Done(_) => KillMode::WithNotice,
                    PhaseResult::Kill(mode) => mode,
                };
                PhaseResult::Kill(mode)
            }
            Err(raw) => {
                error!(critical = true, pid = %pid, name = %tcb.name, state = raw, "process in unknown state");
                tcb.barriers.walk_through(pid);
                PhaseResult::Done(0)
            }
        };
        if let PhaseResult::Kill(mode) = outcome {
            self.rt.kill(tcb, mode);
        }
    }

    fn reference(&self, tcb: &Arc<Tcb>, cycle: u64, walk: bool) -> PhaseResult {
        if !tcb.is_external() {
            error!(critical = true, pid = %tcb.pid, "internal processes have no reference phase");
            tcb.transition(ProcessState::Reference, ProcessState::Init);
            return PhaseResult::Done(0);
        }
        let outcome = self.run_phase(tcb, Phase::Reference, cycle, walk);
        if let PhaseResult::Done(ret) = outcome {
            if ret < 0 {
                warn!(pid = %tcb.pid, ret, "reference phase reported failure");
            }
            tcb.transition(ProcessState::Reference, ProcessState::Init);
        }
        outcome
    }

    fn init(&self, tcb: &Arc<Tcb>, cycle: u64, walk: bool) -> PhaseResult {
        let outcome = self.run_phase(tcb, Phase::Init, cycle, walk);
        match outcome {
            PhaseResult::Done(0) => {
                tcb.transition(ProcessState::Init, ProcessState::Active);
            }
            PhaseResult::Done(ret) => {
                warn!(pid = %tcb.pid, name = %tcb.name, ret, "init failed, terminating");
                tcb.transition(ProcessState::Init, ProcessState::WaitForCycleEnd);
            }
            PhaseResult::Kill(_) => {}
        }
        outcome
    }

    /// Final terminate call during the shutdown sweep
    fn finish(&self, tcb: &Arc<Tcb>, cycle: u64) {
        if let Some(mode) = tcb.take_kill_request() {
            self.rt.kill(tcb, mode);
            return;
        }
        let mode = match tcb.state() {
            Ok(
                ProcessState::Active
                | ProcessState::Sleep
                | ProcessState::NonSleep
                | ProcessState::WaitForCycleEnd
                | ProcessState::Terminate,
            ) => match self.run_phase(tcb, Phase::Terminate, cycle, true) {
                PhaseResult::Done(_) => KillMode::WithNotice,
                PhaseResult::Kill(mode) => mode,
            },
            _ => KillMode::WithNotice,
        };
        tcb.set_state(ProcessState::Terminate);
        self.rt.kill(tcb, mode);
    }

    /// One phase with the process barriers and expression hooks around it
    fn run_phase(&self, tcb: &Arc<Tcb>, phase: Phase, cycle: u64, walk: bool) -> PhaseResult {
        let pid = tcb.pid;
        let _span = debug_span!("phase", pid = %pid, name = %tcb.name, ?phase).entered();
        let hooks = phase != Phase::Reference;

        if walk {
            tcb.barriers.walk(Position::Before, pid, 0);
        }
        if hooks {
            tcb.equations.run(HookSide::Before, pid);
        }
        if walk {
            tcb.barriers.walk(Position::Before, pid, 1);
        }
        let outcome = match &tcb.body {
            ProcessBody::Internal(process) => self.call_internal(tcb, process, phase, cycle),
            ProcessBody::External(_) => self.call_external(tcb, phase, cycle),
        };
        if walk {
            tcb.barriers.walk(Position::Behind, pid, 0);
        }
        if hooks {
            tcb.equations.run(HookSide::Behind, pid);
        }
        if walk {
            tcb.barriers.walk(Position::Behind, pid, 1);
        }
        outcome
    }

    fn call_internal(
        &self,
        tcb: &Tcb,
        process: &Mutex<Box<dyn InternalProcess>>,
        phase: Phase,
        cycle: u64,
    ) -> PhaseResult {
        let ctx = PhaseContext {
            pid: tcb.pid,
            name: &tcb.name,
            cycle,
            services: &self.rt.services,
        };
        let mut process = process.lock();
        match phase {
            Phase::Reference => PhaseResult::Done(0),
            Phase::Init => PhaseResult::Done(process.init(&ctx)),
            Phase::Cyclic => {
                process.cyclic(&ctx);
                PhaseResult::Done(0)
            }
            Phase::Terminate => {
                process.terminate(&ctx);
                PhaseResult::Done(0)
            }
        }
    }

    /// Wire round trip with the worker, holding its group lock
    fn call_external(&self, tcb: &Arc<Tcb>, phase: Phase, cycle: u64) -> PhaseResult {
        let ProcessBody::External(slot) = &tcb.body else {
            return PhaseResult::Done(0);
        };
        let pid = tcb.pid;
        let services = &self.rt.services;

        let _guard = match lock_group_blocking(self.rt.table.lock_group_of(tcb)) {
            Ok(guard) => guard,
            Err(e) => {
                error!(critical = e.is_critical(), pid = %pid, error = %e, "cannot lock process");
                return PhaseResult::Kill(KillMode::Silent);
            }
        };
        let mut slot = slot.lock();
        let Some(conn) = slot.as_mut() else {
            warn!(pid = %pid, "process has no connection");
            return PhaseResult::Kill(KillMode::Silent);
        };

        let mut snapshot = Vec::new();
        if let Err(e) = tcb.copy_lists.lock().snapshot_out(services.blackboard.as_ref(), &mut snapshot) {
            warn!(pid = %pid, error = %e, "building outgoing snapshot failed");
            snapshot.clear();
        }
        let mut vnet = Vec::new();
        services.network.take_outgoing(pid, &mut vnet);

        let debugger = tcb.login.as_ref().is_some_and(|l| l.debugger_attached);
        let timeout = (!debugger).then(|| tcb.params().call_timeout);
        if let Err(e) = conn.set_read_timeout(timeout) {
            error!(pid = %pid, error = %e, "cannot arm call timeout");
            return PhaseResult::Kill(KillMode::Silent);
        }

        let request = Request::Call(PhaseCall {
            phase,
            cycle,
            snapshot: snapshot.into(),
            vnet: vnet.into(),
        });
        let ctx = DispatchContext {
            tcb: tcb.as_ref(),
            services,
            cycles: self.rt,
        };
        let result = exchange(conn, &request, &ctx);

        match result {
            Ok(Exchange::Reply(reply)) => match reply.body {
                ReplyBody::Call { snapshot, vnet } => {
                    if let Err(e) = tcb
                        .copy_lists
                        .lock()
                        .snapshot_in(pid, services.blackboard.as_ref(), &snapshot)
                    {
                        warn!(pid = %pid, error = %e, "incoming snapshot rejected");
                    }
                    if !vnet.is_empty() {
                        services.network.deliver_incoming(pid, self.shared.sim_time_ns(), &vnet);
                    }
                    PhaseResult::Done(reply.ret)
                }
                other => {
                    error!(pid = %pid, body = ?other, "phase acknowledged without snapshot");
                    PhaseResult::Kill(KillMode::WithNotice)
                }
            },
            Ok(Exchange::ImmediateLogout) => {
                info!(pid = %pid, name = %tcb.name, "process logged out");
                PhaseResult::Kill(KillMode::Silent)
            }
            Err(e) => {
                // a lost connection gets no kill notice
                let mode = if e.is_disconnect() {
                    KillMode::Silent
                } else {
                    KillMode::WithNotice
                };
                error!(pid = %pid, name = %tcb.name, error = %e, "phase call failed");
                PhaseResult::Kill(mode)
            }
        }
    }
}
