/*!
 * System Limits and Constants
 *
 * Centralized location for fixed capacities, protocol constants and defaults.
 * Grouped by domain so the engine, the wire codec and the registries agree.
 */

use std::time::Duration;

// =============================================================================
// PROCESS TABLE
// =============================================================================

/// Slots in the PID table
/// A PID is `generation * MAX_PIDS + slot`, so this is also the slot modulus
pub const MAX_PIDS: usize = 64;

/// Upper bound of the generation counter before it wraps back to 1
pub const MAX_PID_GENERATION: i32 = 0x7FFF / MAX_PIDS as i32;

/// Bit reserved for PIDs owned by the real-time subsystem
pub const REALTIME_PID_FLAG: i32 = 0x1000_0000;

/// Maximum process name length accepted on login
pub const MAX_PROCESS_NAME_LEN: usize = 324;

/// Maximum executable / library path length accepted on login
pub const MAX_EXECUTABLE_NAME_LEN: usize = 260;

/// Maximum barrier name length
pub const MAX_BARRIER_NAME_LEN: usize = 64;

// =============================================================================
// SCHEDULERS
// =============================================================================

/// Maximum registered schedulers
pub const MAX_SCHEDULERS: usize = 16;

/// Pending logins per scheduler
pub const LOGIN_QUEUE_CAPACITY: usize = 64;

/// Default scheduler period (1 ms)
pub const DEFAULT_PERIOD_NS: u64 = 1_000_000;

/// Filter constant of the realtime factor low-pass
pub const REALTIME_FACTOR_FILTER: f64 = 0.05;

/// Default termination timeout in seconds
/// Barriers are force-broken after half of it, the hard limit is the full value
pub const DEFAULT_TERMINATION_TIMEOUT_S: u64 = 30;

/// Poll interval used while a scheduler is paused or parked at its start gate
pub const SCHEDULER_IDLE_POLL: Duration = Duration::from_millis(5);

// =============================================================================
// PROCESS DEFAULTS
// =============================================================================

/// Default priority when neither login nor configuration provide one
pub const DEFAULT_PRIORITY: i32 = 150;

/// Default cycle divisor (run every scheduler cycle)
pub const DEFAULT_CYCLE_DIVISOR: i32 = 1;

/// Default phase delay
pub const DEFAULT_CYCLE_DELAY: i32 = 0;

/// Default timeout of a cycle-phase call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default wait budget for reference/dereference locks
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Attempts of a (group) lock before the error policy is applied
pub const LOCK_MAX_RETRIES: u32 = 16;

/// Smallest slice a single lock attempt waits
pub const LOCK_MIN_SLICE: Duration = Duration::from_millis(10);

/// Slots added when an equation array is full
pub const EQUATION_GROW_CHUNK: usize = 10;

// =============================================================================
// DEFERRED RECLAMATION
// =============================================================================

/// Time a retired control block stays in the pool before its PID is freed
pub const DEFAULT_RETIRE_DELAY: Duration = Duration::from_millis(100);

/// Minimum age an entry must have before emergency eviction may take it
pub const DEFAULT_EMERGENCY_MIN_AGE: Duration = Duration::from_millis(10);

// =============================================================================
// WIRE PROTOCOL
// =============================================================================

/// Version exchanged on login and ping
pub const PROTOCOL_VERSION: i32 = 1012;

/// Largest frame accepted in either direction (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Frame header: command + total size
pub const HEADER_SIZE: usize = 8;

/// Smallest acknowledge: header + result code
pub const BASE_ACK_SIZE: usize = 12;

/// Largest raw memory block moved by a single read/write request (32 KiB)
pub const MAX_MEMORY_BLOCK: usize = 32 * 1024;

/// Reserved extension block carried by the login message
pub const LOGIN_RESERVED_LEN: usize = 64;
