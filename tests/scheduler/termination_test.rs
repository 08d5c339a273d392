/*!
 * Termination Tests
 * Cycle-boundary termination, init ordering and forced shutdown
 */

use crate::common::{login_request, wait_until};
use crate::worker::{Hold, Worker};
use pretty_assertions::assert_eq;
use sched_core::barrier::{BarrierMode, Participant};
use sched_core::core::{BarrierNames, SchedulerSpec};
use sched_core::ipc::wire::Phase;
use sched_core::scheduler::INIT_PROCESS_NAME;
use sched_core::{
    CoreConfig, InternalProcess, PhaseContext, Pid, ProcessState, SchedulerId, SchedulerState,
    SchedulerSystem,
};
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

#[test]
#[serial]
fn test_termination_waits_for_cycle_boundary() {
    let mut config = CoreConfig::default();
    config.process.call_timeout_ms = 10_000;
    let system = SchedulerSystem::builder().with_config(config).build().unwrap();
    system.start().unwrap();
    let listener = system.listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let hold = Hold {
        at_call: 3,
        entered: entered_tx,
        release: release_rx,
    };
    let worker = Worker::spawn_with(addr, login_request("busy"), Some(hold));
    let pid = worker.pid;

    entered_rx.recv_timeout(WAIT).unwrap();
    system.terminate_process(pid).unwrap();
    // still inside the cyclic call
    assert_eq!(
        system.process_info(pid).unwrap().state,
        Some(ProcessState::WaitForCycleEnd)
    );
    release_tx.send(()).unwrap();

    assert!(wait_until(WAIT, || system.process_info(pid).is_none()));
    // reference, init, three cyclic calls, terminate
    assert_eq!(worker.join(), 6);

    listener.shutdown();
    system.shutdown();
}

#[test]
#[serial]
fn test_terminate_phase_follows_held_call() {
    let mut config = CoreConfig::default();
    config.process.call_timeout_ms = 10_000;
    let system = SchedulerSystem::builder().with_config(config).build().unwrap();
    system.start().unwrap();
    let listener = system.listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let worker = Worker::spawn_with(
        addr,
        login_request("phased"),
        Some(Hold {
            at_call: 2,
            entered: entered_tx,
            release: release_rx,
        }),
    );
    let journal = worker.journal.clone();
    let pid = worker.pid;

    entered_rx.recv_timeout(WAIT).unwrap();
    system.terminate_process(pid).unwrap();
    release_tx.send(()).unwrap();
    assert!(wait_until(WAIT, || system.process_info(pid).is_none()));
    worker.join();

    let phases = journal.phases();
    assert_eq!(
        phases,
        vec![
            Phase::Reference,
            Phase::Init,
            Phase::Cyclic,
            Phase::Cyclic,
            Phase::Terminate
        ]
    );

    listener.shutdown();
    system.shutdown();
}

struct Init {
    stopped: Arc<AtomicBool>,
    others_alive: Arc<AtomicBool>,
    others_check: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl InternalProcess for Init {
    fn cyclic(&mut self, _ctx: &PhaseContext<'_>) {}

    fn terminate(&mut self, _ctx: &PhaseContext<'_>) {
        self.others_alive.store((self.others_check)(), Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct Plain;

impl InternalProcess for Plain {
    fn cyclic(&mut self, _ctx: &PhaseContext<'_>) {}
}

#[test]
#[serial]
fn test_termination_while_paused_stops_init() {
    let system = SchedulerSystem::builder().build().unwrap();
    system.start().unwrap();
    let init = system
        .start_internal_process(INIT_PROCESS_NAME, Box::new(Plain), None)
        .unwrap();
    assert!(wait_until(WAIT, || {
        system.process_info(init).and_then(|p| p.state) == Some(ProcessState::Active)
    }));

    system.pause();
    assert!(wait_until(WAIT, || system.is_paused()));

    // no timeout armed: init must be reached without barrier breaking
    system.request_termination();
    assert!(wait_until(Duration::from_secs(3), || system.check_all_terminated()));
    assert!(system.get_pid_by_name(INIT_PROCESS_NAME).is_none());
    assert!(system.list_processes().is_empty());
    system.shutdown();
}

#[test]
#[serial]
fn test_init_process_stops_first() {
    let system = Arc::new(SchedulerSystem::builder().build().unwrap());
    system.start().unwrap();

    let other = system
        .start_internal_process("worker", Box::new(Plain), None)
        .unwrap();
    let stopped = Arc::new(AtomicBool::new(false));
    let others_alive = Arc::new(AtomicBool::new(false));
    let others_check = {
        let system = Arc::downgrade(&system);
        Arc::new(move || {
            system
                .upgrade()
                .is_some_and(|s| s.process_info(other).is_some())
        })
    };
    system
        .start_internal_process(
            INIT_PROCESS_NAME,
            Box::new(Init {
                stopped: stopped.clone(),
                others_alive: others_alive.clone(),
                others_check,
            }),
            None,
        )
        .unwrap();
    assert!(wait_until(WAIT, || system.list_processes().iter().all(|p| {
        p.state == Some(ProcessState::Active)
    }) && system.list_processes().len() == 2));

    system.request_termination();
    system.set_termination_timeout(30);
    assert!(wait_until(WAIT, || system.check_all_terminated()));

    assert!(stopped.load(Ordering::SeqCst));
    assert!(others_alive.load(Ordering::SeqCst));
    assert!(system.list_processes().is_empty());
    assert_eq!(
        system.scheduler_state(SchedulerId::MAIN).unwrap(),
        SchedulerState::IsTerminated
    );
    system.shutdown();
}

#[test]
#[serial]
fn test_stuck_barrier_is_broken_on_timeout() {
    let barriers = BarrierNames {
        before_signal_and_wait: vec!["sync".to_string()],
        ..BarrierNames::default()
    };
    let mut config = CoreConfig::default();
    config.scheduler.termination_timeout_s = 2;
    config.schedulers = vec![
        SchedulerSpec::named("first").with_barriers(barriers.clone()),
        SchedulerSpec::named("second").with_barriers(barriers),
    ];
    let system = SchedulerSystem::builder().with_config(config).build().unwrap();

    // never arrives
    let phantom = Participant::Process(Pid(9999));
    system
        .barriers()
        .get("sync")
        .unwrap()
        .connect(phantom, BarrierMode::SignalAndWait);
    system.start().unwrap();

    let started = Instant::now();
    system.shutdown();
    assert!(started.elapsed() < WAIT);

    let second = system.scheduler_id("second").unwrap();
    assert_eq!(second, SchedulerId(1));
    for id in [SchedulerId::MAIN, second] {
        assert_eq!(system.scheduler_state(id).unwrap(), SchedulerState::IsTerminated);
    }
}

#[test]
fn test_unstarted_system_terminates_immediately() {
    let system = SchedulerSystem::builder().build().unwrap();
    assert!(!system.check_all_terminated());
    system.request_termination();
    assert!(system.check_all_terminated());
}
