/*!
 * Sched Core Library
 * Real-time cyclic scheduling of internal and external worker processes
 */

pub mod barrier;
pub mod collab;
pub mod core;
pub mod ipc;
pub mod monitoring;
pub mod process;
pub mod scheduler;

// Re-exports
pub use crate::core::errors::*;
pub use crate::core::{Clock, ConfigHandle, CoreConfig, ManualClock, Pid, SchedulerId, SystemClock, Vid};
pub use collab::Services;
pub use ipc::{LoginListener, WorkerClient, WorkerHandler};
pub use monitoring::init_tracing;
pub use process::{InternalProcess, KillMode, PhaseContext, ProcessInfo, ProcessState, SchedulingParams};
pub use scheduler::{SchedulerState, SchedulerSystem, SchedulerSystemBuilder};
