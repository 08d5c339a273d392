/*!
 * Scheduler System
 *
 * Public entry point: registers schedulers, spawns their threads, starts
 * processes, and drives global termination. Host-side requests to external
 * workers live in `host.rs`.
 */

use super::control::{self, ControlGate, Controller};
use super::engine::Engine;
use super::pacing::{Pacer, RealtimeFactor};
use super::runtime::{init_pid, Runtime};
use super::termination::{Escalation, TerminationCoordinator, TerminationPhase};
use super::types::{SchedulerShared, SchedulerState};
use crate::barrier::{BarrierRegistry, BarrierSet};
use crate::collab::{CompiledExpression, Services};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::{ConfigHandle, CoreConfig, SchedulerSpec};
use crate::core::errors::{CoreResult, SchedulerError, SchedulerResult, TransportResult};
use crate::core::limits::{MAX_SCHEDULERS, SCHEDULER_IDLE_POLL};
use crate::core::{Pid, SchedulerId};
use crate::ipc::dispatch::sched_info;
use crate::ipc::login::{LoginAcceptor, LoginListener};
use crate::ipc::wire::SchedInfo;
use crate::process::{
    AbortPrompt, EquationSelector, ErrorBehavior, HookSide, InternalProcess, KillMode,
    LockTimeoutPrompt, LoginOverrides, PidRegistry, ProcessInfo, ProcessTable, SchedulingParams,
    Tcb, TcbPool,
};
use log::info;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, warn};

// ============================================================================
// Builder
// ============================================================================

pub struct SchedulerSystemBuilder {
    config: CoreConfig,
    clock: Option<Arc<dyn Clock>>,
    services: Option<Services>,
    lock_behavior: ErrorBehavior,
    prompt: Option<Arc<dyn LockTimeoutPrompt>>,
}

impl SchedulerSystemBuilder {
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = Some(services);
        self
    }

    /// How host-side requests react when a worker lock cannot be taken in time
    #[inline]
    #[must_use]
    pub fn with_lock_behavior(
        mut self,
        behavior: ErrorBehavior,
        prompt: Arc<dyn LockTimeoutPrompt>,
    ) -> Self {
        self.lock_behavior = behavior;
        self.prompt = Some(prompt);
        self
    }

    pub fn build(self) -> CoreResult<SchedulerSystem> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let registry = Arc::new(PidRegistry::new());
        let pool = TcbPool::new(registry, clock.clone())
            .with_retire_delay(self.config.process.retire_delay())
            .with_emergency_min_age(self.config.process.emergency_min_age());
        let specs = self.config.scheduler_specs();

        let rt = Arc::new(Runtime {
            config: ConfigHandle::new(self.config),
            clock: clock.clone(),
            services: self.services.unwrap_or_else(Services::in_memory),
            table: ProcessTable::new(),
            pool,
            barriers: BarrierRegistry::new(),
            schedulers: RwLock::new(Vec::new()),
            termination: TerminationCoordinator::new(clock),
            realtime: Arc::new(RealtimeFactor::new()),
            lock_behavior: self.lock_behavior,
            prompt: self.prompt.unwrap_or_else(|| Arc::new(AbortPrompt)),
        });
        let (controller, gate) = control::channel();
        let system = SchedulerSystem {
            rt,
            controller,
            gate: Mutex::new(Some(gate)),
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutdown_initiated: AtomicBool::new(false),
        };
        for spec in &specs {
            system.register_scheduler(spec)?;
        }
        info!("Scheduler system created with {} scheduler(s)", specs.len());
        Ok(system)
    }
}

// ============================================================================
// System
// ============================================================================

pub struct SchedulerSystem {
    pub(super) rt: Arc<Runtime>,
    controller: Controller,
    gate: Mutex<Option<ControlGate>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shutdown_initiated: AtomicBool,
}

impl SchedulerSystem {
    pub fn builder() -> SchedulerSystemBuilder {
        SchedulerSystemBuilder {
            config: CoreConfig::default(),
            clock: None,
            services: None,
            lock_behavior: ErrorBehavior::Silent,
            prompt: None,
        }
    }

    // ------------------------------------------------------------------------
    // Schedulers
    // ------------------------------------------------------------------------

    /// Add a scheduler; only possible before `start()`
    pub fn register_scheduler(&self, spec: &SchedulerSpec) -> SchedulerResult<SchedulerId> {
        if self.started.load(Ordering::Acquire) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let mut schedulers = self.rt.schedulers.write();
        if let Some(existing) = schedulers.iter().find(|s| s.name.as_str() == spec.name) {
            warn!(scheduler = %spec.name, "scheduler registered twice");
            return Ok(existing.id);
        }
        if schedulers.len() >= MAX_SCHEDULERS {
            return Err(SchedulerError::TooManySchedulers(MAX_SCHEDULERS));
        }
        let id = SchedulerId(schedulers.len());
        let barriers = BarrierSet::resolve(&spec.barriers, &self.rt.barriers);
        let shared = Arc::new(SchedulerShared::new(id, &spec.name, barriers, spec.external_only_info));
        if !spec.external_only_info {
            // connected now so no barrier releases before every thread runs
            shared.barriers.connect(shared.participant());
        }
        schedulers.push(shared);
        info!("Registered scheduler {} as {}", spec.name, id);
        Ok(id)
    }

    /// Spawn one thread per scheduler
    pub fn start(&self) -> SchedulerResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let config = self.rt.config.get();
        let schedulers: Vec<Arc<SchedulerShared>> = self
            .rt
            .schedulers
            .read()
            .iter()
            .filter(|s| !s.external_only_info)
            .cloned()
            .collect();
        for shared in &schedulers {
            self.rt.termination.expect(shared.id);
        }

        let mut threads = self.threads.lock();
        for shared in schedulers {
            let mut engine = Engine::new(self.rt.clone(), shared.clone());
            if shared.id.is_main() {
                let pacer = Pacer::new(
                    self.rt.clock.clone(),
                    self.rt.realtime.clone(),
                    config.scheduler.period_ns,
                )
                .with_busy_wait(config.scheduler.dont_call_sleep);
                engine = engine.with_pacer(pacer);
                if let Some(gate) = self.gate.lock().take() {
                    engine = engine.with_gate(gate);
                }
            }
            let id = shared.id;
            let handle = thread::Builder::new()
                .name(format!("sched-{}", shared.name))
                .spawn(move || engine.run())
                .map_err(|e| {
                    self.rt.termination.forget(id);
                    shared.barriers.disconnect(shared.participant());
                    SchedulerError::Spawn(e.to_string())
                })?;
            threads.push(handle);
        }
        info!("Started {} scheduler thread(s)", threads.len());
        Ok(())
    }

    pub fn scheduler_id(&self, name: &str) -> Option<SchedulerId> {
        self.rt.scheduler_by_name(name).map(|s| s.id)
    }

    pub fn scheduler_state(&self, id: SchedulerId) -> SchedulerResult<SchedulerState> {
        Ok(self.rt.scheduler(id)?.state())
    }

    pub fn scheduler_cycle(&self, id: SchedulerId) -> SchedulerResult<u64> {
        Ok(self.rt.scheduler(id)?.cycle())
    }

    /// Filtered simulated/wall time ratio of the main scheduler
    pub fn realtime_factor(&self) -> f64 {
        self.rt.realtime.get()
    }

    // ------------------------------------------------------------------------
    // Pause / Step
    // ------------------------------------------------------------------------

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    /// Run exactly `cycles` more main cycles, then pause
    pub fn step(&self, cycles: u64) {
        self.controller.step(cycles);
    }

    pub fn is_paused(&self) -> bool {
        self.controller.is_paused()
    }

    // ------------------------------------------------------------------------
    // Processes
    // ------------------------------------------------------------------------

    /// Start an in-process task; `params` overrides the configured scheduling
    pub fn start_internal_process(
        &self,
        name: &str,
        process: Box<dyn InternalProcess>,
        params: Option<SchedulingParams>,
    ) -> CoreResult<Pid> {
        if self.rt.termination.is_requested() {
            return Err(SchedulerError::InvalidState("termination in progress".into()).into());
        }
        let pid = self.rt.pool.allocate_unique(name)?;
        let (configured, barriers, scheduler) = self.rt.placement(name, LoginOverrides::NONE);
        let params = params.unwrap_or(configured);
        let tcb = Arc::new(Tcb::internal(pid, name, scheduler, params, barriers, process));
        if let Err(e) = self.rt.enqueue(tcb) {
            if let Err(free_err) = self.rt.pool.registry().free(pid) {
                warn!(pid = %pid, error = %free_err, "releasing PID failed");
            }
            return Err(e.into());
        }
        info!("Started internal process {} as pid {} on {}", name, pid, scheduler);
        Ok(pid)
    }

    /// Login handler for listeners (TCP, unix socket, or custom transports)
    pub fn login_acceptor(&self) -> Arc<dyn LoginAcceptor> {
        self.rt.clone()
    }

    pub fn listen_tcp(&self, addr: SocketAddr) -> TransportResult<LoginListener> {
        let trace = self.rt.config.get().login.trace_wire;
        LoginListener::spawn_tcp(addr, self.login_acceptor(), trace)
    }

    #[cfg(unix)]
    pub fn listen_unix(&self, path: &std::path::Path) -> TransportResult<LoginListener> {
        let trace = self.rt.config.get().login.trace_wire;
        LoginListener::spawn_unix(path, self.login_acceptor(), trace)
    }

    fn tcb(&self, pid: Pid) -> SchedulerResult<Arc<Tcb>> {
        self.rt
            .table
            .get(pid)
            .ok_or(SchedulerError::ProcessNotFound(pid.raw()))
    }

    /// Stop a process at the end of its current cycle
    pub fn terminate_process(&self, pid: Pid) -> SchedulerResult<()> {
        let tcb = self.tcb(pid)?;
        tcb.request_termination()?;
        debug!(pid = %pid, "termination requested");
        Ok(())
    }

    /// Remove a process at its scheduler's next visit
    pub fn kill_process(&self, pid: Pid, mode: KillMode) -> SchedulerResult<()> {
        self.tcb(pid)?.request_kill(mode);
        Ok(())
    }

    /// Change priority; the process moves behind processes of equal priority
    pub fn change_priority(&self, pid: Pid, priority: i32) -> SchedulerResult<()> {
        let tcb = self.tcb(pid)?;
        let shared = self.rt.scheduler(tcb.scheduler)?;
        let mut params = tcb.params();
        params.priority = priority;
        if !shared.list.lock().reschedule(pid, params) {
            // still queued for login
            tcb.set_params(params);
        }
        debug!(pid = %pid, priority, "priority changed");
        Ok(())
    }

    pub fn scheduling_info(&self, pid: Pid) -> SchedulerResult<SchedInfo> {
        let tcb = self.tcb(pid)?;
        Ok(sched_info(&tcb, self.rt.as_ref()))
    }

    pub fn add_equations(
        &self,
        pid: Pid,
        nr: i32,
        before: Option<Arc<dyn CompiledExpression>>,
        behind: Option<Arc<dyn CompiledExpression>>,
    ) -> SchedulerResult<()> {
        let tcb = self.tcb(pid)?;
        if let Some(expr) = before {
            tcb.equations.add(HookSide::Before, nr, expr);
        }
        if let Some(expr) = behind {
            tcb.equations.add(HookSide::Behind, nr, expr);
        }
        Ok(())
    }

    /// Remove matching expressions from both sides; returns how many went
    pub fn remove_equations(&self, pid: Pid, selector: EquationSelector) -> SchedulerResult<usize> {
        let tcb = self.tcb(pid)?;
        Ok(tcb.equations.remove(HookSide::Before, selector, pid)
            + tcb.equations.remove(HookSide::Behind, selector, pid))
    }

    pub fn process_info(&self, pid: Pid) -> Option<ProcessInfo> {
        self.rt.table.process_info(pid)
    }

    pub fn list_processes(&self) -> Vec<ProcessInfo> {
        self.rt.table.list()
    }

    pub fn get_pid_by_name(&self, name: &str) -> Option<Pid> {
        self.rt.table.find_by_name(name).map(|t| t.pid)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.rt.is_running(name)
    }

    pub fn services(&self) -> &Services {
        &self.rt.services
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.rt.config
    }

    pub fn barriers(&self) -> &BarrierRegistry {
        &self.rt.barriers
    }

    // ------------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------------

    /// Begin global termination (init first, then every scheduler)
    pub fn request_termination(&self) {
        let init = init_pid(&self.rt);
        if !self.rt.termination.begin(init.is_some()) {
            return;
        }
        // a parked main scheduler would never visit init again
        self.controller.cancel();
        match init.and_then(|pid| self.rt.table.get(pid)) {
            Some(tcb) => {
                info!("Termination requested, stopping init process {}", tcb.pid);
                if let Err(e) = tcb.request_termination() {
                    warn!(pid = %tcb.pid, error = %e, "init process refused termination");
                }
            }
            None => info!("Termination requested"),
        }
    }

    /// Arm the forced-termination timeout
    pub fn set_termination_timeout(&self, seconds: u64) {
        self.rt.termination.set_timeout(seconds);
    }

    /// Advance the termination sequence; true once it is complete
    pub fn check_all_terminated(&self) -> bool {
        let term = &self.rt.termination;
        match term.phase() {
            TerminationPhase::Idle => return false,
            TerminationPhase::Done => return true,
            TerminationPhase::WaitInit => {
                if init_pid(&self.rt).is_none() {
                    term.raise();
                    info!("Init process gone, terminating schedulers");
                }
            }
            TerminationPhase::WaitAll => {}
        }
        match term.escalation() {
            Escalation::BreakBarriers => {
                warn!("termination timeout: breaking all barriers");
                self.rt.barriers.break_all();
            }
            Escalation::GiveUp => {
                error!("schedulers did not terminate in time, giving up");
                term.finish();
                return true;
            }
            Escalation::None => {}
        }
        let all = !self.started.load(Ordering::Acquire)
            || self
                .rt
                .schedulers
                .read()
                .iter()
                .filter(|s| !s.external_only_info)
                .all(|s| s.state() == SchedulerState::IsTerminated);
        if all {
            term.finish();
            info!("All schedulers terminated");
        }
        all
    }

    /// Terminate everything and join the scheduler threads
    pub fn shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.rt.termination.phase() == TerminationPhase::Idle {
            self.request_termination();
            self.set_termination_timeout(self.rt.config.get().scheduler.termination_timeout_s);
        }
        let started = Instant::now();
        while !self.check_all_terminated() {
            thread::sleep(SCHEDULER_IDLE_POLL);
        }
        let clean = self
            .rt
            .schedulers
            .read()
            .iter()
            .filter(|s| !s.external_only_info)
            .all(|s| s.state() == SchedulerState::IsTerminated);
        let threads = std::mem::take(&mut *self.threads.lock());
        if clean {
            for handle in threads {
                if handle.join().is_err() {
                    error!("scheduler thread panicked");
                }
            }
        } else {
            warn!(count = threads.len(), "leaving stuck scheduler threads detached");
        }
        let freed = self.rt.pool.reclaim_all();
        info!(
            "Scheduler system shut down in {:?} ({} control blocks freed)",
            started.elapsed(),
            freed
        );
    }
}

impl Drop for SchedulerSystem {
    fn drop(&mut self) {
        if self.shutdown_initiated.load(Ordering::Acquire) || !self.started.load(Ordering::Acquire) {
            return;
        }
        warn!(
            "SchedulerSystem dropped without calling shutdown() - scheduler threads keep running. \
             Use `system.shutdown()` for graceful cleanup."
        );
    }
}

impl std::fmt::Debug for SchedulerSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerSystem")
            .field("runtime", &self.rt)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
