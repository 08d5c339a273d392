/*!
 * Process List
 * Priority-ordered processes of one scheduler
 */

use crate::core::Pid;
use crate::process::{SchedulingParams, Tcb};
use std::sync::Arc;

/// Ascending priority; equal priorities keep insertion order
#[derive(Debug, Default)]
pub struct ProcessList {
    entries: Vec<Arc<Tcb>>,
}

impl ProcessList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert behind every entry with a priority lower than or equal to its own
    pub fn insert(&mut self, tcb: Arc<Tcb>) {
        let priority = tcb.params().priority;
        let index = self
            .entries
            .iter()
            .position(|t| t.params().priority > priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, tcb);
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Arc<Tcb>> {
        let index = self.entries.iter().position(|t| t.pid == pid)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Tcb>> {
        self.entries.iter().find(|t| t.pid == pid).cloned()
    }

    /// Apply new parameters and move the process to its new position
    ///
    /// The divider counter is aligned with another process that runs with
    /// the same divisor so both keep calling in the same cycles.
    pub fn reschedule(&mut self, pid: Pid, params: SchedulingParams) -> bool {
        let Some(tcb) = self.remove(pid) else {
            return false;
        };
        let params = params.normalized();
        tcb.set_params(params);
        if let Some(peer) = self.entries.iter().find(|t| t.params().divisor == params.divisor) {
            let peer_params = peer.params();
            let mut counter = peer.time_counter() + peer_params.delay - params.delay;
            if counter < 0 {
                counter += params.divisor;
            }
            tcb.set_time_counter(counter);
        }
        self.insert(tcb);
        true
    }

    /// Copy of the current order for one engine pass
    pub fn snapshot(&self) -> Vec<Arc<Tcb>> {
        self.entries.clone()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.entries.iter().map(|t| t.pid).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Arc<Tcb>> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::ProcessBarriers;
    use crate::core::SchedulerId;
    use crate::process::{InternalProcess, PhaseContext};
    use std::time::Duration;

    struct Idle;

    impl InternalProcess for Idle {
        fn cyclic(&mut self, _ctx: &PhaseContext<'_>) {}
    }

    fn tcb(pid: i32, priority: i32) -> Arc<Tcb> {
        Arc::new(Tcb::internal(
            Pid(pid),
            "p",
            SchedulerId::MAIN,
            SchedulingParams {
                priority,
                divisor: 2,
                delay: 0,
                call_timeout: Duration::from_secs(1),
            },
            ProcessBarriers::default(),
            Box::new(Idle),
        ))
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut list = ProcessList::new();
        list.insert(tcb(1, 20));
        list.insert(tcb(2, 10));
        list.insert(tcb(3, 20));
        list.insert(tcb(4, 5));
        assert_eq!(list.pids(), vec![Pid(4), Pid(2), Pid(1), Pid(3)]);
    }

    #[test]
    fn test_reschedule_moves_behind_equals() {
        let mut list = ProcessList::new();
        list.insert(tcb(1, 10));
        list.insert(tcb(2, 20));
        list.insert(tcb(3, 30));
        let mut params = list.get(Pid(3)).unwrap().params();
        params.priority = 10;
        assert!(list.reschedule(Pid(3), params));
        assert_eq!(list.pids(), vec![Pid(1), Pid(3), Pid(2)]);
        assert!(!list.reschedule(Pid(9), params));
    }

    #[test]
    fn test_reschedule_aligns_counter() {
        let mut list = ProcessList::new();
        let peer = tcb(1, 10);
        peer.tick();
        list.insert(peer);
        list.insert(tcb(2, 20));
        let mut params = list.get(Pid(2)).unwrap().params();
        params.delay = 1;
        list.reschedule(Pid(2), params);
        // peer counter 1 + delay 0 - delay 1
        assert_eq!(list.get(Pid(2)).unwrap().time_counter(), 0);
    }
}
