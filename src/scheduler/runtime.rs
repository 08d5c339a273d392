/*!
 * Scheduler Runtime
 *
 * State shared by every scheduler thread, the login listener and host-side
 * callers: configuration, collaborators, the live process table, the retire
 * pool, barriers and the termination coordinator.
 */

use super::pacing::RealtimeFactor;
use super::termination::TerminationCoordinator;
use super::types::SchedulerShared;
use crate::barrier::{BarrierRegistry, ProcessBarriers};
use crate::collab::Services;
use crate::core::clock::Clock;
use crate::core::config::{ConfigHandle, ProcessSettings};
use crate::core::errors::{SchedulerError, SchedulerResult};
use crate::core::{Pid, SchedulerId};
use crate::ipc::call::Connection;
use crate::ipc::dispatch::CycleSource;
use crate::ipc::login::{Admission, LoginAcceptor, LoginRejection};
use crate::ipc::wire::Request;
use crate::process::{
    ErrorBehavior, ExecutableGroup, KillMode, LockTimeoutPrompt, LoginDetails, LoginOverrides,
    ProcessBody, ProcessTable, SchedulingParams, Tcb, TcbPool,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Runtime {
    pub config: ConfigHandle,
    pub clock: Arc<dyn Clock>,
    pub services: Services,
    pub table: ProcessTable,
    pub pool: TcbPool,
    pub barriers: BarrierRegistry,
    pub schedulers: RwLock<Vec<Arc<SchedulerShared>>>,
    pub termination: TerminationCoordinator,
    pub realtime: Arc<RealtimeFactor>,
    pub lock_behavior: ErrorBehavior,
    pub prompt: Arc<dyn LockTimeoutPrompt>,
}

impl Runtime {
    pub fn scheduler(&self, id: SchedulerId) -> SchedulerResult<Arc<SchedulerShared>> {
        self.schedulers
            .read()
            .get(id.0)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(id.to_string().into()))
    }

    pub fn scheduler_by_name(&self, name: &str) -> Option<Arc<SchedulerShared>> {
        self.schedulers
            .read()
            .iter()
            .find(|s| s.name.as_str() == name)
            .cloned()
    }

    /// Target scheduler of a process; unknown or info-only names fall back to main
    pub fn scheduler_for(&self, settings: Option<&ProcessSettings>) -> SchedulerId {
        let Some(name) = settings.and_then(|s| s.scheduler.as_deref()) else {
            return SchedulerId::MAIN;
        };
        match self.scheduler_by_name(name) {
            Some(shared) if !shared.external_only_info => shared.id,
            Some(_) => {
                warn!(scheduler = name, "scheduler only reports information, using main");
                SchedulerId::MAIN
            }
            None => {
                warn!(scheduler = name, "unknown scheduler, using main");
                SchedulerId::MAIN
            }
        }
    }

    /// Resolved parameters, barriers and scheduler for a process name
    pub fn placement(
        &self,
        name: &str,
        overrides: LoginOverrides,
    ) -> (SchedulingParams, ProcessBarriers, SchedulerId) {
        let config = self.config.get();
        let settings = config.process_settings(name);
        let params = SchedulingParams::resolve(&config.process, settings, overrides);
        let barriers = settings
            .map(|s| ProcessBarriers::resolve(&s.barriers, &s.loop_out, &self.barriers))
            .unwrap_or_default();
        (params, barriers, self.scheduler_for(settings))
    }

    /// True if a live or retiring process already uses `name`
    pub fn is_running(&self, name: &str) -> bool {
        self.table.find_by_name(name).is_some() || self.pool.registry().lookup_by_name(name).is_some()
    }

    /// Hand a new process to its scheduler; it is picked up at the next boundary
    pub fn enqueue(&self, tcb: Arc<Tcb>) -> SchedulerResult<()> {
        let shared = self.scheduler(tcb.scheduler)?;
        self.table.insert(tcb.clone());
        if let Err(tcb) = shared.logins.push(tcb) {
            self.table.remove(tcb.pid);
            return Err(SchedulerError::LoginQueueFull(shared.name.clone()));
        }
        // a scheduler parked in a barrier services its queue on wakeup
        self.barriers.wake_all_for_login();
        Ok(())
    }

    /// Remove a process and every resource it holds
    ///
    /// The control block itself is retired, not dropped, so concurrent
    /// holders of the PID never see a recycled identity.
    pub fn kill(&self, tcb: &Arc<Tcb>, mode: KillMode) {
        let pid = tcb.pid;
        if self.table.remove(pid).is_none() {
            debug!(pid = %pid, "process already removed");
            return;
        }
        tcb.equations.remove_all(pid);
        if let ProcessBody::External(slot) = &tcb.body {
            if let Some(mut conn) = slot.lock().take() {
                if mode == KillMode::WithNotice {
                    if let Err(e) = conn.send_request(&Request::Kill) {
                        debug!(pid = %pid, error = %e, "kill notice not delivered");
                    }
                }
                conn.close();
            }
        }
        self.services.blackboard.remove_all_for_process(pid);
        self.services.network.close_all(pid);
        if let Ok(shared) = self.scheduler(tcb.scheduler) {
            shared.list.lock().remove(pid);
        }
        tcb.barriers.disconnect_all(pid);
        self.pool.mark(pid, tcb.clone());
        info!(pid = %pid, name = %tcb.name, ?mode, "process removed");
    }

    pub fn main_scheduler(&self) -> Option<Arc<SchedulerShared>> {
        self.schedulers.read().first().cloned()
    }
}

impl CycleSource for Runtime {
    fn scheduler_cycle(&self, id: SchedulerId) -> u64 {
        self.schedulers.read().get(id.0).map_or(0, |s| s.cycle())
    }

    fn main_cycle(&self) -> u64 {
        self.main_scheduler().map_or(0, |s| s.cycle())
    }

    fn period_ns(&self) -> u64 {
        self.config.get().scheduler.period_ns
    }

    fn separate_ref_init(&self) -> bool {
        self.config.get().scheduler.separate_cycles_for_ref_and_init
    }
}

impl LoginAcceptor for Runtime {
    fn admit(&self, request: crate::ipc::wire::LoginRequest) -> Result<Admission, LoginRejection> {
        // name check and allocation are one step under the registry lock
        let pid = self.pool.allocate_unique(&request.name)?;
        Ok(Admission { pid, request })
    }

    fn commit(&self, admission: Admission, connection: Connection) {
        let Admission { pid, request } = admission;
        let overrides = LoginOverrides {
            priority: request.priority,
            divisor: request.divisor,
            delay: request.delay,
        };
        let (params, barriers, scheduler) = self.placement(&request.name, overrides);
        let tcb = Tcb::external(pid, &request.name, scheduler, params, barriers, connection)
            .with_group(ExecutableGroup {
                executable: request.executable.as_str().into(),
                index: request.index,
                count: request.count,
            })
            .with_login_details(LoginDetails {
                os_pid: request.os_pid,
                dll_name: request.dll_name.clone(),
                machine: request.machine,
                debugger_attached: request.debugger_attached,
                exe_base: request.exe_base,
                dll_base: request.dll_base,
            });
        let tcb = Arc::new(tcb);
        if let Err(e) = self.enqueue(tcb.clone()) {
            error!(pid = %pid, name = %request.name, error = %e, "cannot schedule logged-in process");
            if let ProcessBody::External(slot) = &tcb.body {
                if let Some(mut conn) = slot.lock().take() {
                    conn.close();
                }
            }
            if let Err(e) = self.pool.registry().free(pid) {
                warn!(pid = %pid, error = %e, "releasing PID failed");
            }
            return;
        }
        debug!(pid = %pid, scheduler = %scheduler, ?params, "external process queued");
    }

    fn abort(&self, admission: Admission) {
        if let Err(e) = self.pool.registry().free(admission.pid) {
            warn!(pid = %admission.pid, error = %e, "releasing PID failed");
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("processes", &self.table.len())
            .field("retired", &self.pool.len())
            .field("schedulers", &self.schedulers.read().len())
            .field("termination", &self.termination)
            .finish_non_exhaustive()
    }
}

/// Pid of the init process, if one is running
pub fn init_pid(runtime: &Runtime) -> Option<Pid> {
    runtime
        .table
        .find_by_name(super::termination::INIT_PROCESS_NAME)
        .map(|t| t.pid)
}
