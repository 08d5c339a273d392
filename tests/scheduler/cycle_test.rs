/*!
 * Cycle Tests
 * Divisor scheduling, stepping, internal processes and expression hooks
 */

use crate::common::{login_request, params, wait_until};
use crate::worker::Worker;
use pretty_assertions::assert_eq;
use sched_core::collab::CompiledExpression;
use sched_core::process::EquationSelector;
use sched_core::{
    CoreConfig, CoreError, InternalProcess, LoginListener, PhaseContext, Pid, ProcessState, SchedulerId,
    RegistryError, SchedulerState, SchedulerSystem,
};
use serial_test::serial;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn paused_system() -> (SchedulerSystem, LoginListener, SocketAddr) {
    let mut config = CoreConfig::default();
    config.process.call_timeout_ms = 10_000;
    let system = SchedulerSystem::builder().with_config(config).build().unwrap();
    system.pause();
    system.start().unwrap();
    assert!(wait_until(WAIT, || system.is_paused()));
    let listener = system.listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    (system, listener, addr)
}

fn wait_active(system: &SchedulerSystem, pid: Pid) {
    assert!(wait_until(WAIT, || {
        system.process_info(pid).and_then(|i| i.state) == Some(ProcessState::Active)
    }));
}

/// Step `cycles` cycles and wait until the scheduler parks again
fn step(system: &SchedulerSystem, cycles: u64) {
    let before = system.scheduler_cycle(SchedulerId::MAIN).unwrap();
    system.step(cycles);
    assert!(wait_until(WAIT, || system.is_paused()
        && system.scheduler_cycle(SchedulerId::MAIN).unwrap() == before + cycles));
}

#[test]
#[serial]
fn test_divisor_three_runs_every_third_cycle() {
    let (system, listener, addr) = paused_system();
    let worker = Worker::spawn_with(addr, login_request("divided").with_scheduling(-1, 3, -1), None);

    // admission runs reference and init while the scheduler is parked
    wait_active(&system, worker.pid);
    let calls = system.process_info(worker.pid).unwrap().call_count;
    let seen = worker.journal.cyclic();

    step(&system, 9);
    assert_eq!(system.process_info(worker.pid).unwrap().call_count, calls + 3);
    assert_eq!(worker.journal.cyclic(), seen + 3);

    let info = system.scheduling_info(worker.pid).unwrap();
    assert_eq!(info.process_divisor, 3);
    assert_eq!(info.process_calls, calls + 3);

    listener.shutdown();
    system.shutdown();
    worker.join();
}

#[test]
#[serial]
fn test_paused_scheduler_reports_stopped() {
    let (system, listener, _addr) = paused_system();
    assert_eq!(
        system.scheduler_state(SchedulerId::MAIN).unwrap(),
        SchedulerState::IsStopped
    );
    system.resume();
    assert!(wait_until(WAIT, || {
        system.scheduler_state(SchedulerId::MAIN).unwrap() == SchedulerState::Running
    }));
    listener.shutdown();
    system.shutdown();
    assert_eq!(
        system.scheduler_state(SchedulerId::MAIN).unwrap(),
        SchedulerState::IsTerminated
    );
}

struct Ticker {
    cyclic: Arc<AtomicU64>,
    terminated: Arc<AtomicU64>,
}

impl InternalProcess for Ticker {
    fn cyclic(&mut self, _ctx: &PhaseContext<'_>) {
        self.cyclic.fetch_add(1, Ordering::SeqCst);
    }

    fn terminate(&mut self, _ctx: &PhaseContext<'_>) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingExpr {
    runs: AtomicU64,
    released: AtomicU64,
}

impl CompiledExpression for CountingExpr {
    fn execute(&self, _pid: Pid) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, _pid: Pid) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
#[serial]
fn test_internal_process_with_hooks() {
    let (system, listener, _addr) = paused_system();
    let cyclic = Arc::new(AtomicU64::new(0));
    let terminated = Arc::new(AtomicU64::new(0));
    let pid = system
        .start_internal_process(
            "ticker",
            Box::new(Ticker {
                cyclic: cyclic.clone(),
                terminated: terminated.clone(),
            }),
            Some(params(50, 2, 0)),
        )
        .unwrap();
    wait_active(&system, pid);
    assert!(system.is_running("ticker"));

    let before = Arc::new(CountingExpr::default());
    let behind = Arc::new(CountingExpr::default());
    system
        .add_equations(pid, 1, Some(before.clone()), Some(behind.clone()))
        .unwrap();

    step(&system, 10);
    assert_eq!(cyclic.load(Ordering::SeqCst), 5);
    assert_eq!(before.runs.load(Ordering::SeqCst), 5);
    assert_eq!(behind.runs.load(Ordering::SeqCst), 5);

    assert_eq!(system.remove_equations(pid, EquationSelector::All).unwrap(), 2);
    assert_eq!(before.released.load(Ordering::SeqCst), 1);
    step(&system, 2);
    assert_eq!(before.runs.load(Ordering::SeqCst), 5);

    system.change_priority(pid, 7).unwrap();
    assert_eq!(system.process_info(pid).unwrap().priority, 7);

    listener.shutdown();
    system.shutdown();
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
    assert!(system.process_info(pid).is_none());
}

#[test]
#[serial]
fn test_duplicate_internal_name_rejected() {
    let (system, listener, _addr) = paused_system();
    let ticker = || {
        Box::new(Ticker {
            cyclic: Arc::new(AtomicU64::new(0)),
            terminated: Arc::new(AtomicU64::new(0)),
        })
    };
    system.start_internal_process("once", ticker(), None).unwrap();
    assert!(matches!(
        system.start_internal_process("once", ticker(), None),
        Err(CoreError::Registry(RegistryError::AlreadyRunning(_)))
    ));
    assert_eq!(system.list_processes().len(), 1);

    // racing starts under one name leave exactly one process behind
    let started = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| system.start_internal_process("raced", ticker(), None)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count()
    });
    assert_eq!(started, 1);
    assert_eq!(system.list_processes().len(), 2);
    listener.shutdown();
    system.shutdown();
}
