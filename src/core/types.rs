/*!
 * Core Types
 * Common aliases shared across the scheduling core
 */

use smartstring::{LazyCompact, SmartString};

/// Inline string for process, executable and barrier names.
/// Names up to 23 bytes never touch the heap.
pub type InlineString = SmartString<LazyCompact>;

/// Simulated time and wall-clock readings in nanoseconds
pub type Nanos = u64;

/// Result code carried in acknowledge frames (0 = success)
pub type RetCode = i32;
