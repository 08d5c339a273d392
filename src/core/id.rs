/*!
 * Identifiers
 * Type-safe wrappers for process, variable and scheduler ids
 */

use super::limits::{MAX_PIDS, REALTIME_PID_FLAG};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type-Safe ID Wrappers
// ============================================================================

/// Process ID
///
/// Encodes `generation * MAX_PIDS + slot`; a reused slot therefore yields a
/// different value. Real-time PIDs additionally carry [`REALTIME_PID_FLAG`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub i32);

/// Blackboard variable ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vid(pub i32);

/// Index of a registered scheduler (0 is the main, pacing scheduler)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerId(pub usize);

impl Pid {
    /// Compose a PID from generation and slot
    #[inline]
    #[must_use]
    pub const fn compose(generation: i32, slot: usize) -> Self {
        Pid(generation * MAX_PIDS as i32 + slot as i32)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Slot index inside the PID table
    #[inline]
    pub const fn slot(self) -> usize {
        ((self.0 & !REALTIME_PID_FLAG) as usize) % MAX_PIDS
    }

    #[inline]
    pub const fn is_realtime(self) -> bool {
        self.0 & REALTIME_PID_FLAG != 0
    }

    /// The same PID with the real-time tag removed
    #[inline]
    #[must_use]
    pub const fn untagged(self) -> Self {
        Pid(self.0 & !REALTIME_PID_FLAG)
    }

    #[inline]
    #[must_use]
    pub const fn tagged_realtime(self) -> Self {
        Pid(self.0 | REALTIME_PID_FLAG)
    }
}

impl Vid {
    /// Valid ids are positive; 0 and -1 are "no variable" markers
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0 && self.0 != -1
    }
}

impl SchedulerId {
    pub const MAIN: SchedulerId = SchedulerId(0);

    #[inline]
    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Vid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_and_slot() {
        let pid = Pid::compose(3, 7);
        assert_eq!(pid.raw(), 3 * 64 + 7);
        assert_eq!(pid.slot(), 7);
        assert!(!pid.is_realtime());
    }

    #[test]
    fn test_realtime_tag_keeps_slot() {
        let pid = Pid::compose(2, 5).tagged_realtime();
        assert!(pid.is_realtime());
        assert_eq!(pid.slot(), 5);
        assert_eq!(pid.untagged(), Pid::compose(2, 5));
    }

    #[test]
    fn test_vid_markers() {
        assert!(!Vid(0).is_valid());
        assert!(!Vid(-1).is_valid());
        assert!(Vid(12).is_valid());
    }
}
