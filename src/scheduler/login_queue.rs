/*!
 * Login Queue
 *
 * Processes handed to a scheduler from other threads. The scheduler drains
 * the queue only at cycle boundaries, so list membership never changes in
 * the middle of a pass.
 */

use crate::core::limits::LOGIN_QUEUE_CAPACITY;
use crate::process::Tcb;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

#[derive(Debug)]
pub struct LoginQueue {
    queue: ArrayQueue<Arc<Tcb>>,
}

impl LoginQueue {
    pub fn new() -> Self {
        Self {
            queue: ArrayQueue::new(LOGIN_QUEUE_CAPACITY),
        }
    }

    /// Queue a process; hands it back when the queue is full
    pub fn push(&self, tcb: Arc<Tcb>) -> Result<(), Arc<Tcb>> {
        self.queue.push(tcb)
    }

    /// Take every queued process in arrival order
    pub fn drain(&self) -> Vec<Arc<Tcb>> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(tcb) = self.queue.pop() {
            out.push(tcb);
        }
        out
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for LoginQueue {
    fn default() -> Self {
        Self::new()
    }
}
