/*!
 * Process Module
 * PID allocation, control blocks, access locking and deferred reclamation
 */

pub mod equations;
pub mod lock;
pub mod pool;
pub mod registry;
pub mod table;
pub mod tcb;

// Re-export for convenience
pub use equations::{EquationHooks, EquationSelector, HookSide};
pub use lock::{
    lock_group, lock_group_blocking, AbortPrompt, AccessLock, ErrorBehavior, LockTimeoutPrompt,
    ProcessLockGuard, PromptDecision,
};
pub use pool::RetirePool;
pub use registry::PidRegistry;
pub use table::{ProcessInfo, ProcessTable};
pub use tcb::{
    ExecutableGroup, InternalProcess, KillMode, LoginDetails, LoginOverrides, PhaseContext,
    ProcessBody, ProcessKind, ProcessState, SchedulingParams, Tcb,
};

use std::sync::Arc;

/// Pool holding retired control blocks
pub type TcbPool = RetirePool<Arc<Tcb>>;
