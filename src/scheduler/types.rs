/*!
 * Scheduler Types
 * Lifecycle state and the data one scheduler shares with other threads
 */

use super::list::ProcessList;
use super::login_queue::LoginQueue;
use crate::barrier::{BarrierSet, Participant};
use crate::core::types::InlineString;
use crate::core::SchedulerId;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Lifecycle of one scheduler thread
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    Off = 0,
    Running = 1,
    Stopping = 2,
    IsStopped = 3,
    Terminating = 4,
    IsTerminated = 5,
    /// Reports information only, never runs a loop
    ExternalOnlyInfo = 6,
}

impl SchedulerState {
    #[inline]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => SchedulerState::Off,
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            3 => SchedulerState::IsStopped,
            4 => SchedulerState::Terminating,
            5 => SchedulerState::IsTerminated,
            6 => SchedulerState::ExternalOnlyInfo,
            _ => return None,
        })
    }

    /// # Performance
    /// Hot path - used in every state log line
    #[inline(always)]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::IsStopped => "is_stopped",
            Self::Terminating => "terminating",
            Self::IsTerminated => "is_terminated",
            Self::ExternalOnlyInfo => "external_only_info",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "off" => Ok(Self::Off),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "is_stopped" => Ok(Self::IsStopped),
            "terminating" => Ok(Self::Terminating),
            "is_terminated" => Ok(Self::IsTerminated),
            "external_only_info" => Ok(Self::ExternalOnlyInfo),
            _ => Err(format!("Invalid scheduler state '{}'", s)),
        }
    }
}

impl Serialize for SchedulerState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SchedulerState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Per-scheduler data visible to the system, the login thread and the engine
pub struct SchedulerShared {
    pub id: SchedulerId,
    pub name: InlineString,
    pub external_only_info: bool,
    state: AtomicU8,
    cycle: AtomicU64,
    sim_time_ns: AtomicU64,
    /// Ordered by ascending priority; the engine walks a snapshot
    pub list: Mutex<ProcessList>,
    pub logins: LoginQueue,
    /// Cycle-start (before) and cycle-end (behind) barriers
    pub barriers: BarrierSet,
}

impl SchedulerShared {
    pub fn new(id: SchedulerId, name: &str, barriers: BarrierSet, external_only_info: bool) -> Self {
        let state = if external_only_info {
            SchedulerState::ExternalOnlyInfo
        } else {
            SchedulerState::Off
        };
        Self {
            id,
            name: InlineString::from(name),
            external_only_info,
            state: AtomicU8::new(state as u8),
            cycle: AtomicU64::new(0),
            sim_time_ns: AtomicU64::new(0),
            list: Mutex::new(ProcessList::new()),
            logins: LoginQueue::new(),
            barriers,
        }
    }

    #[inline]
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_raw(self.state.load(Ordering::Acquire)).unwrap_or(SchedulerState::Off)
    }

    #[inline]
    pub fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Acquire)
    }

    #[inline]
    pub fn sim_time_ns(&self) -> u64 {
        self.sim_time_ns.load(Ordering::Acquire)
    }

    /// Advance cycle counter and simulated time; returns the new cycle
    pub fn advance(&self, period_ns: u64) -> u64 {
        self.sim_time_ns.fetch_add(period_ns, Ordering::AcqRel);
        self.cycle.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn participant(&self) -> Participant {
        Participant::Scheduler(self.id)
    }
}

impl std::fmt::Debug for SchedulerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("cycle", &self.cycle())
            .finish_non_exhaustive()
    }
}
