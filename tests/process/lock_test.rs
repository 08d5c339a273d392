/*!
 * Group Lock Tests
 * Processes sharing an executable are locked as one unit
 */

use pretty_assertions::assert_eq;
use sched_core::barrier::ProcessBarriers;
use sched_core::process::{
    lock_group, lock_group_blocking, AbortPrompt, ErrorBehavior, ExecutableGroup, LockTimeoutPrompt,
    ProcessTable, PromptDecision, Tcb,
};
use sched_core::{InternalProcess, LockError, PhaseContext, Pid, SchedulerId, SchedulingParams};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

struct Idle;

impl InternalProcess for Idle {
    fn cyclic(&mut self, _ctx: &PhaseContext<'_>) {}
}

fn member(pid: i32, name: &str, executable: &str, index: i32) -> Arc<Tcb> {
    let params = SchedulingParams {
        priority: 10,
        divisor: 1,
        delay: 0,
        call_timeout: Duration::from_secs(1),
    };
    let tcb = Tcb::internal(
        Pid(pid),
        name,
        SchedulerId::MAIN,
        params,
        ProcessBarriers::default(),
        Box::new(Idle),
    )
    .with_group(ExecutableGroup {
        executable: executable.into(),
        index,
        count: 2,
    });
    Arc::new(tcb)
}

fn table() -> ProcessTable {
    let table = ProcessTable::new();
    table.insert(member(65, "a", "pair.exe", 0));
    table.insert(member(66, "b", "pair.exe", 1));
    table
}

#[test]
fn test_locking_a_blocks_b_until_released() {
    let table = Arc::new(table());
    let a = table.get(Pid(65)).unwrap();
    let guard = lock_group_blocking(table.lock_group_of(&a)).unwrap();
    assert_eq!(guard.members().len(), 2);

    let (tx, rx) = mpsc::channel();
    let contender = {
        let table = table.clone();
        thread::spawn(move || {
            let b = table.get(Pid(66)).unwrap();
            let guard = lock_group_blocking(table.lock_group_of(&b)).unwrap();
            tx.send(()).unwrap();
            drop(guard);
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    drop(guard);
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    contender.join().unwrap();
}

#[test]
fn test_bounded_lock_times_out_silently() {
    let table = Arc::new(table());
    let a = table.get(Pid(65)).unwrap();
    let guard = lock_group_blocking(table.lock_group_of(&a)).unwrap();

    let table2 = table.clone();
    let result = thread::spawn(move || {
        let b = table2.get(Pid(66)).unwrap();
        lock_group(
            table2.lock_group_of(&b),
            Duration::from_millis(160),
            ErrorBehavior::Silent,
            &AbortPrompt,
        )
        .map(|_| ())
    })
    .join()
    .unwrap();

    // members are sorted by pid, so the first one reported is 65
    assert_eq!(result, Err(LockError::Timeout(65)));
    drop(guard);
    assert!(!a.lock.is_locked());
}

struct CountingPrompt {
    asked: AtomicU32,
    release: Arc<AtomicBool>,
}

impl LockTimeoutPrompt for CountingPrompt {
    fn on_timeout(&self, _pid: Pid, _name: &str, _waited: Duration) -> PromptDecision {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.release.store(true, Ordering::SeqCst);
        PromptDecision::KeepWaiting
    }
}

#[test]
fn test_prompt_keeps_waiting() {
    let table = Arc::new(table());
    let a = table.get(Pid(65)).unwrap();
    let release = Arc::new(AtomicBool::new(false));

    let holder = {
        let table = table.clone();
        let release = release.clone();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let guard = lock_group_blocking(table.lock_group_of(&a)).unwrap();
            tx.send(()).unwrap();
            while !release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            drop(guard);
        });
        rx.recv().unwrap();
        handle
    };

    let prompt = CountingPrompt {
        asked: AtomicU32::new(0),
        release,
    };
    let b = table.get(Pid(66)).unwrap();
    let guard = lock_group(
        table.lock_group_of(&b),
        Duration::from_millis(160),
        ErrorBehavior::Prompt,
        &prompt,
    )
    .unwrap();
    assert!(prompt.asked.load(Ordering::SeqCst) >= 1);
    drop(guard);
    holder.join().unwrap();
}
