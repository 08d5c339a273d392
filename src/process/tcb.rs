/*!
 * Process Control Block
 * Identity, state, scheduling parameters and per-process resources
 */

use super::equations::EquationHooks;
use super::lock::AccessLock;
use crate::barrier::ProcessBarriers;
use crate::collab::{CopyLists, Services};
use crate::core::config::{ProcessDefaults, ProcessSettings};
use crate::core::errors::{SchedulerError, SchedulerResult};
use crate::core::types::InlineString;
use crate::core::{Pid, SchedulerId};
use crate::ipc::call::Connection;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a process
///
/// `Login -> Reference -> Init -> Active -> WaitForCycleEnd -> Terminate`;
/// only external processes pass through `Login` and `Reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProcessState {
    Active = 0,
    Sleep = 1,
    NonSleep = 2,
    Reference = 3,
    Init = 4,
    Terminate = 5,
    Login = 6,
    WaitForCycleEnd = 10,
}

impl ProcessState {
    #[inline]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => ProcessState::Active,
            1 => ProcessState::Sleep,
            2 => ProcessState::NonSleep,
            3 => ProcessState::Reference,
            4 => ProcessState::Init,
            5 => ProcessState::Terminate,
            6 => ProcessState::Login,
            10 => ProcessState::WaitForCycleEnd,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// Cooperative task running on the scheduler thread
    Internal,
    /// Worker reached over a transport
    External,
}

/// How a pending kill is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    WithNotice,
    /// The transport already failed; a notice cannot be delivered
    Silent,
}

const KILL_NONE: u8 = 0;
const KILL_NOTICE: u8 = 1;
const KILL_SILENT: u8 = 2;

// ============================================================================
// Scheduling Parameters
// ============================================================================

/// Values a worker declared at login; negative means "use the configuration"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginOverrides {
    pub priority: i32,
    pub divisor: i32,
    pub delay: i32,
}

impl LoginOverrides {
    pub const NONE: LoginOverrides = LoginOverrides {
        priority: -1,
        divisor: -1,
        delay: -1,
    };
}

impl Default for LoginOverrides {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingParams {
    /// Lower runs earlier
    pub priority: i32,
    /// The cyclic function runs every `divisor` scheduler cycles
    pub divisor: i32,
    /// Phase offset inside the divisor window
    pub delay: i32,
    pub call_timeout: Duration,
}

impl SchedulingParams {
    pub fn from_defaults(defaults: &ProcessDefaults) -> Self {
        Self {
            priority: defaults.priority,
            divisor: defaults.divisor,
            delay: defaults.delay,
            call_timeout: Duration::from_millis(defaults.call_timeout_ms),
        }
        .normalized()
    }

    /// Defaults, then per-process settings, then values declared at login
    pub fn resolve(
        defaults: &ProcessDefaults,
        settings: Option<&ProcessSettings>,
        login: LoginOverrides,
    ) -> Self {
        let mut params = Self::from_defaults(defaults);
        if let Some(s) = settings {
            params.priority = s.priority.unwrap_or(params.priority);
            params.divisor = s.divisor.unwrap_or(params.divisor);
            params.delay = s.delay.unwrap_or(params.delay);
            if let Some(ms) = s.call_timeout_ms {
                params.call_timeout = Duration::from_millis(ms);
            }
        }
        if login.priority > 0 {
            params.priority = login.priority;
        }
        if login.divisor >= 0 {
            params.divisor = login.divisor.max(1);
        }
        if login.delay >= 0 {
            params.delay = login.delay;
        }
        params.normalized()
    }

    /// Divisor at least 1, delay inside `0..divisor`
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.divisor = self.divisor.max(1);
        self.delay = self.delay.clamp(0, self.divisor - 1);
        self
    }

    /// Divider counter value for a freshly activated process
    #[inline]
    pub fn initial_counter(&self) -> i32 {
        -self.delay
    }
}

/// Membership of a process in a multi-process executable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableGroup {
    pub executable: InlineString,
    pub index: i32,
    pub count: i32,
}

/// Details an external worker reported at login
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginDetails {
    pub os_pid: i32,
    pub dll_name: String,
    pub machine: i32,
    pub debugger_attached: bool,
    pub exe_base: u64,
    pub dll_base: u64,
}

// ============================================================================
// Internal Processes
// ============================================================================

/// What an internal process sees of its environment during a phase call
pub struct PhaseContext<'a> {
    pub pid: Pid,
    pub name: &'a str,
    /// Cycle counter of the owning scheduler
    pub cycle: u64,
    pub services: &'a Services,
}

/// Cooperative task executed directly on the scheduler thread
pub trait InternalProcess: Send {
    /// One-shot initialization; a non-zero result terminates the process
    fn init(&mut self, _ctx: &PhaseContext<'_>) -> i32 {
        0
    }

    fn cyclic(&mut self, ctx: &PhaseContext<'_>);

    fn terminate(&mut self, _ctx: &PhaseContext<'_>) {}
}

/// What actually runs the phase functions
pub enum ProcessBody {
    Internal(Mutex<Box<dyn InternalProcess>>),
    /// `None` once the transport was closed
    External(Mutex<Option<Connection>>),
}

// ============================================================================
// Control Block
// ============================================================================

/// Per-process control and scheduling record
///
/// Owned by exactly one scheduler list while live; retired through the
/// deferred-free pool so late readers holding an `Arc` can still observe it.
pub struct Tcb {
    pub pid: Pid,
    pub name: InlineString,
    pub kind: ProcessKind,
    pub scheduler: SchedulerId,
    pub group: Option<ExecutableGroup>,
    pub login: Option<LoginDetails>,
    state: AtomicU8,
    params: Mutex<SchedulingParams>,
    time_counter: AtomicI32,
    call_count: AtomicU64,
    kill_request: AtomicU8,
    pub lock: AccessLock,
    pub equations: EquationHooks,
    pub copy_lists: Mutex<CopyLists>,
    pub barriers: ProcessBarriers,
    pub body: ProcessBody,
}

impl Tcb {
    pub fn internal(
        pid: Pid,
        name: &str,
        scheduler: SchedulerId,
        params: SchedulingParams,
        barriers: ProcessBarriers,
        process: Box<dyn InternalProcess>,
    ) -> Self {
        Self::build(
            pid,
            name,
            ProcessKind::Internal,
            scheduler,
            params,
            barriers,
            ProcessState::Init,
            ProcessBody::Internal(Mutex::new(process)),
        )
    }

    /// External process right after a successful handshake
    pub fn external(
        pid: Pid,
        name: &str,
        scheduler: SchedulerId,
        params: SchedulingParams,
        barriers: ProcessBarriers,
        connection: Connection,
    ) -> Self {
        Self::build(
            pid,
            name,
            ProcessKind::External,
            scheduler,
            params,
            barriers,
            ProcessState::Login,
            ProcessBody::External(Mutex::new(Some(connection))),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        pid: Pid,
        name: &str,
        kind: ProcessKind,
        scheduler: SchedulerId,
        params: SchedulingParams,
        barriers: ProcessBarriers,
        state: ProcessState,
        body: ProcessBody,
    ) -> Self {
        let params = params.normalized();
        Self {
            pid,
            name: InlineString::from(name),
            kind,
            scheduler,
            group: None,
            login: None,
            state: AtomicU8::new(state as u8),
            time_counter: AtomicI32::new(params.initial_counter()),
            params: Mutex::new(params),
            call_count: AtomicU64::new(0),
            kill_request: AtomicU8::new(KILL_NONE),
            lock: AccessLock::new(),
            equations: EquationHooks::new(),
            copy_lists: Mutex::new(CopyLists::new()),
            barriers,
            body,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_group(mut self, group: ExecutableGroup) -> Self {
        self.group = Some(group);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_login_details(mut self, login: LoginDetails) -> Self {
        self.login = Some(login);
        self
    }

    /// Executable name used for group locking
    pub fn executable(&self) -> Option<&str> {
        self.group.as_ref().map(|g| g.executable.as_str())
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Current state; `Err(raw)` for a value outside the state set
    #[inline]
    pub fn state(&self) -> Result<ProcessState, u8> {
        let raw = self.state.load(Ordering::Acquire);
        ProcessState::from_raw(raw).ok_or(raw)
    }

    #[inline]
    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to` unless someone changed the state meanwhile
    pub fn transition(&self, from: ProcessState, to: ProcessState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ask the process to stop at its next cycle boundary
    pub fn request_termination(&self) -> SchedulerResult<()> {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match ProcessState::from_raw(raw) {
                    Some(
                        ProcessState::Active
                        | ProcessState::Sleep
                        | ProcessState::NonSleep
                        | ProcessState::Reference
                        | ProcessState::Init,
                    ) => Some(ProcessState::WaitForCycleEnd as u8),
                    _ => None,
                }
            });
        match result {
            Ok(_) => Ok(()),
            Err(raw) => match ProcessState::from_raw(raw) {
                // Already on its way out
                Some(ProcessState::WaitForCycleEnd | ProcessState::Terminate) => Ok(()),
                Some(state) => Err(SchedulerError::InvalidState(
                    format!("process {} is in state {:?}", self.pid, state).into(),
                )),
                None => Err(SchedulerError::Critical(
                    format!("process {} has unknown state {}", self.pid, raw).into(),
                )),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    #[inline]
    pub fn params(&self) -> SchedulingParams {
        *self.params.lock()
    }

    pub fn set_params(&self, params: SchedulingParams) {
        *self.params.lock() = params.normalized();
    }

    /// Advance the divider counter; true when the cyclic function is due
    pub fn tick(&self) -> bool {
        let divisor = self.params.lock().divisor;
        let next = self.time_counter.fetch_add(1, Ordering::AcqRel) + 1;
        if next >= divisor {
            self.time_counter.store(0, Ordering::Release);
            self.call_count.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn time_counter(&self) -> i32 {
        self.time_counter.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_time_counter(&self, value: i32) {
        self.time_counter.store(value, Ordering::Release);
    }

    #[inline]
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Kill Requests
    // ------------------------------------------------------------------------

    /// Ask the owning scheduler to kill this process at its next visit
    ///
    /// A silent request wins over one with notice.
    pub fn request_kill(&self, mode: KillMode) {
        let code = match mode {
            KillMode::WithNotice => KILL_NOTICE,
            KillMode::Silent => KILL_SILENT,
        };
        self.kill_request.fetch_max(code, Ordering::AcqRel);
    }

    pub fn take_kill_request(&self) -> Option<KillMode> {
        match self.kill_request.swap(KILL_NONE, Ordering::AcqRel) {
            KILL_NOTICE => Some(KillMode::WithNotice),
            KILL_SILENT => Some(KillMode::Silent),
            _ => None,
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.kind == ProcessKind::External
    }
}

impl std::fmt::Debug for Tcb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tcb")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("scheduler", &self.scheduler)
            .field("state", &self.state())
            .field("params", &self.params())
            .finish_non_exhaustive()
    }
}
