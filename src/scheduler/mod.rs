/*!
 * Scheduler Module
 * Scheduler threads, process state machine, pacing, control and shutdown
 */

pub mod control;
pub mod engine;
mod host;
pub mod list;
pub mod login_queue;
pub mod pacing;
pub mod runtime;
pub mod system;
pub mod termination;
pub mod types;

// Re-export public API
pub use control::{ControlCommand, Controller};
pub use list::ProcessList;
pub use pacing::RealtimeFactor;
pub use system::{SchedulerSystem, SchedulerSystemBuilder};
pub use termination::{TerminationPhase, INIT_PROCESS_NAME};
pub use types::{SchedulerShared, SchedulerState};
