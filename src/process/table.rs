/*!
 * Process Table
 * Index of live control blocks shared by schedulers, login and host requests
 */

use super::tcb::{ProcessKind, ProcessState, Tcb};
use crate::core::types::InlineString;
use crate::core::{Pid, SchedulerId};
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serializable snapshot of one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub name: InlineString,
    pub kind: ProcessKind,
    /// `None` when the stored state is outside the known set
    pub state: Option<ProcessState>,
    pub priority: i32,
    pub divisor: i32,
    pub delay: i32,
    pub call_count: u64,
    pub scheduler: SchedulerId,
    pub executable: Option<InlineString>,
}

impl From<&Tcb> for ProcessInfo {
    fn from(tcb: &Tcb) -> Self {
        let params = tcb.params();
        Self {
            pid: tcb.pid,
            name: tcb.name.clone(),
            kind: tcb.kind,
            state: tcb.state().ok(),
            priority: params.priority,
            divisor: params.divisor,
            delay: params.delay,
            call_count: tcb.call_count(),
            scheduler: tcb.scheduler,
            executable: tcb.group.as_ref().map(|g| g.executable.clone()),
        }
    }
}

/// Live control blocks keyed by PID
#[derive(Debug, Default)]
pub struct ProcessTable {
    by_pid: DashMap<Pid, Arc<Tcb>, RandomState>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            by_pid: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn insert(&self, tcb: Arc<Tcb>) -> Option<Arc<Tcb>> {
        self.by_pid.insert(tcb.pid, tcb)
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<Tcb>> {
        self.by_pid.remove(&pid).map(|(_, tcb)| tcb)
    }

    #[inline]
    pub fn get(&self, pid: Pid) -> Option<Arc<Tcb>> {
        self.by_pid.get(&pid).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.by_pid.contains_key(&pid)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Tcb>> {
        self.by_pid
            .iter()
            .find(|e| e.value().name.as_str() == name)
            .map(|e| Arc::clone(e.value()))
    }

    /// Every process living inside `executable`, the caller included
    pub fn siblings(&self, executable: &str) -> Vec<Arc<Tcb>> {
        let mut members: Vec<Arc<Tcb>> = self
            .by_pid
            .iter()
            .filter(|e| e.value().executable() == Some(executable))
            .map(|e| Arc::clone(e.value()))
            .collect();
        members.sort_by_key(|t| t.pid);
        members
    }

    /// `tcb` plus its executable siblings, or `tcb` alone
    pub fn lock_group_of(&self, tcb: &Arc<Tcb>) -> Vec<Arc<Tcb>> {
        match tcb.executable() {
            Some(exe) => {
                let mut group = self.siblings(exe);
                if !group.iter().any(|t| t.pid == tcb.pid) {
                    group.push(Arc::clone(tcb));
                }
                group
            }
            None => vec![Arc::clone(tcb)],
        }
    }

    pub fn process_info(&self, pid: Pid) -> Option<ProcessInfo> {
        self.by_pid.get(&pid).map(|e| ProcessInfo::from(e.value().as_ref()))
    }

    /// All processes ordered by PID
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self
            .by_pid
            .iter()
            .map(|e| ProcessInfo::from(e.value().as_ref()))
            .collect();
        infos.sort_by_key(|i| i.pid);
        infos
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }
}
