/*!
 * Exclusive-Access Lock
 *
 * Serializes everything that talks to one external worker: the owning
 * scheduler's phase calls and host-initiated requests from other threads.
 * Processes living inside one executable are locked as a group.
 *
 * # Performance
 *
 * Holder bookkeeping and the wait are a single `parking_lot` mutex plus
 * condvar; no allocation on the lock path.
 */

use super::tcb::Tcb;
use crate::core::errors::{LockError, LockResult};
use crate::core::limits::{LOCK_MAX_RETRIES, LOCK_MIN_SLICE};
use crate::core::Pid;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Per-process mutex that remembers its holding thread
#[derive(Debug, Default)]
pub struct AccessLock {
    holder: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl AccessLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock within `timeout`
    ///
    /// Taking a lock the calling thread already holds is a critical error,
    /// never a deadlock.
    pub fn try_lock_for(&self, pid: Pid, timeout: Duration) -> LockResult<bool> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut holder = self.holder.lock();
        loop {
            match *holder {
                None => {
                    *holder = Some(me);
                    return Ok(true);
                }
                Some(owner) if owner == me => {
                    error!(pid = %pid, "process already locked by the calling thread");
                    return Err(LockError::Reentrant(pid.raw()));
                }
                Some(_) => {
                    if self.released.wait_until(&mut holder, deadline).timed_out() && holder.is_some() {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Wait without bound
    pub fn lock(&self, pid: Pid) -> LockResult<()> {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        loop {
            match *holder {
                None => {
                    *holder = Some(me);
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    error!(pid = %pid, "process already locked by the calling thread");
                    return Err(LockError::Reentrant(pid.raw()));
                }
                Some(_) => self.released.wait(&mut holder),
            }
        }
    }

    pub fn unlock(&self, pid: Pid) -> LockResult<()> {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        match *holder {
            Some(owner) if owner == me => {
                *holder = None;
                drop(holder);
                self.released.notify_one();
                Ok(())
            }
            _ => {
                error!(pid = %pid, "unlock from a thread that does not hold the lock");
                Err(LockError::NotHolder(pid.raw()))
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.holder.lock().is_some()
    }

    /// True when the calling thread holds the lock
    pub fn held_by_current(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }
}

// ============================================================================
// Group Locking
// ============================================================================

/// What happens once the retry budget is spent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBehavior {
    Silent,
    /// Ask the operator whether to keep waiting
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
    KeepWaiting,
    Abort,
}

/// Operator interaction on lock timeouts
pub trait LockTimeoutPrompt: Send + Sync {
    fn on_timeout(&self, pid: Pid, name: &str, waited: Duration) -> PromptDecision;
}

/// Never keeps waiting
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortPrompt;

impl LockTimeoutPrompt for AbortPrompt {
    fn on_timeout(&self, pid: Pid, name: &str, waited: Duration) -> PromptDecision {
        warn!(pid = %pid, name, waited_ms = waited.as_millis() as u64, "lock timeout, aborting");
        PromptDecision::Abort
    }
}

/// Every member of a locked group; releases all of them on drop
#[must_use = "the group is unlocked as soon as the guard is dropped"]
pub struct ProcessLockGuard {
    members: Vec<Arc<Tcb>>,
}

impl ProcessLockGuard {
    pub fn members(&self) -> &[Arc<Tcb>] {
        &self.members
    }

    /// Release explicitly, reporting the first failure
    pub fn unlock(mut self) -> LockResult<()> {
        release_all(std::mem::take(&mut self.members))
    }
}

impl Drop for ProcessLockGuard {
    fn drop(&mut self) {
        if self.members.is_empty() {
            return;
        }
        if let Err(e) = release_all(std::mem::take(&mut self.members)) {
            error!(error = %e, "releasing process group lock failed");
        }
    }
}

impl std::fmt::Debug for ProcessLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pids: Vec<Pid> = self.members.iter().map(|t| t.pid).collect();
        f.debug_struct("ProcessLockGuard").field("pids", &pids).finish()
    }
}

fn release_all(members: Vec<Arc<Tcb>>) -> LockResult<()> {
    let mut first_err = None;
    for tcb in members.iter().rev() {
        if let Err(e) = tcb.lock.unlock(tcb.pid) {
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

fn sort_members(mut members: Vec<Arc<Tcb>>) -> Vec<Arc<Tcb>> {
    members.sort_by_key(|t| t.pid);
    members.dedup_by_key(|t| t.pid);
    members
}

/// Lock every member or none
///
/// Each attempt gives every member a slice of `max_wait`; a member that
/// times out releases everything acquired in that attempt before the whole
/// group is retried. After the retry budget `behavior` decides.
pub fn lock_group(
    members: Vec<Arc<Tcb>>,
    max_wait: Duration,
    behavior: ErrorBehavior,
    prompt: &dyn LockTimeoutPrompt,
) -> LockResult<ProcessLockGuard> {
    let members = sort_members(members);
    let Some(first) = members.first().cloned() else {
        return Ok(ProcessLockGuard { members });
    };
    let slice = (max_wait / LOCK_MAX_RETRIES).max(LOCK_MIN_SLICE);
    let started = Instant::now();

    loop {
        for attempt in 0..LOCK_MAX_RETRIES {
            if try_lock_members(&members, slice)? {
                if attempt > 0 {
                    debug!(pid = %first.pid, attempt, "group lock acquired after retry");
                }
                return Ok(ProcessLockGuard { members });
            }
        }
        match behavior {
            ErrorBehavior::Silent => return Err(LockError::Timeout(first.pid.raw())),
            ErrorBehavior::Prompt => {
                match prompt.on_timeout(first.pid, &first.name, started.elapsed()) {
                    PromptDecision::KeepWaiting => continue,
                    PromptDecision::Abort => return Err(LockError::Aborted(first.pid.raw())),
                }
            }
        }
    }
}

/// One all-or-nothing pass over the group
fn try_lock_members(members: &[Arc<Tcb>], slice: Duration) -> LockResult<bool> {
    for (index, tcb) in members.iter().enumerate() {
        let acquired = match tcb.lock.try_lock_for(tcb.pid, slice) {
            Ok(acquired) => acquired,
            Err(e) => {
                release_all(members[..index].to_vec())?;
                return Err(e);
            }
        };
        if !acquired {
            release_all(members[..index].to_vec())?;
            return Ok(false);
        }
    }
    Ok(true)
}

/// Lock the whole group without a time bound (scheduler threads)
pub fn lock_group_blocking(members: Vec<Arc<Tcb>>) -> LockResult<ProcessLockGuard> {
    let members = sort_members(members);
    for (index, tcb) in members.iter().enumerate() {
        if let Err(e) = tcb.lock.lock(tcb.pid) {
            release_all(members[..index].to_vec())?;
            return Err(e);
        }
    }
    Ok(ProcessLockGuard { members })
}
