/*!
 * Core Module
 * Identifiers, limits, clock, configuration and error handling
 */

pub mod clock;
pub mod config;
pub mod errors;
pub mod id;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BarrierNames, ConfigHandle, CoreConfig, LoginConfig, ProcessDefaults, ProcessSettings,
    SchedulerConfig, SchedulerSpec,
};
pub use errors::*;
pub use id::{Pid, SchedulerId, Vid};
pub use types::*;
