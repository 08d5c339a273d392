/*!
 * Host Request Tests
 * Memory access and section write-back on a parked external worker, and
 * requests that arrive while the worker is inside its cycle
 */

use crate::common::{login_request, wait_until};
use crate::worker::{Hold, Worker};
use bytes::Bytes;
use pretty_assertions::assert_eq;
use sched_core::core::limits::MAX_MEMORY_BLOCK;
use sched_core::{
    CallError, CoreConfig, CoreError, InternalProcess, PhaseContext, Pid, ProcessState,
    SchedulerError, SchedulerSystem,
};
use serial_test::serial;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

struct Plain;

impl InternalProcess for Plain {
    fn cyclic(&mut self, _ctx: &PhaseContext<'_>) {}
}

#[test]
#[serial]
fn test_host_requests_on_parked_worker() {
    let mut config = CoreConfig::default();
    config.process.call_timeout_ms = 10_000;
    let system = SchedulerSystem::builder().with_config(config).build().unwrap();
    system.pause();
    system.start().unwrap();
    let listener = system.listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
    let worker = Worker::spawn(listener.local_addr().unwrap(), "target");
    let pid = worker.pid;
    assert!(wait_until(WAIT, || {
        system.process_info(pid).and_then(|i| i.state) == Some(ProcessState::Active)
    }));

    let data = system.read_process_memory(pid, 0x4000, 2).unwrap();
    assert_eq!(data, Bytes::from_static(b"\x10\x20"));
    system.write_process_memory(pid, 0x4000, &[1, 2]).unwrap();
    system.dereference_all(pid).unwrap();

    match system.read_process_memory(pid, 0, MAX_MEMORY_BLOCK + 1) {
        Err(CoreError::Scheduler(SchedulerError::MemoryBlockTooLarge(len))) => {
            assert_eq!(len, MAX_MEMORY_BLOCK + 1)
        }
        other => panic!("expected MemoryBlockTooLarge, got {:?}", other),
    }

    // the worker refuses this one; it stays connected
    match system.write_section_to_exe(pid, ".data") {
        Err(CoreError::Call(CallError::Failed(-1))) => {}
        other => panic!("expected a failed acknowledge, got {:?}", other),
    }
    assert!(system.process_info(pid).is_some());

    let internal = system
        .start_internal_process("local", Box::new(Plain), None)
        .unwrap();
    match system.dereference_all(internal) {
        Err(CoreError::Scheduler(SchedulerError::NotExternal(raw))) => {
            assert_eq!(raw, internal.raw())
        }
        other => panic!("expected NotExternal, got {:?}", other),
    }
    match system.dereference_all(Pid(4242)) {
        Err(CoreError::Scheduler(SchedulerError::ProcessNotFound(4242))) => {}
        other => panic!("expected ProcessNotFound, got {:?}", other),
    }

    listener.shutdown();
    system.shutdown();
    worker.join();
}

#[test]
#[serial]
fn test_host_request_waits_for_running_call() {
    let mut config = CoreConfig::default();
    config.process.call_timeout_ms = 10_000;
    config.process.lock_timeout_ms = 10_000;
    let system = SchedulerSystem::builder().with_config(config).build().unwrap();
    system.start().unwrap();
    let listener = system.listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let worker = Worker::spawn_with(
        listener.local_addr().unwrap(),
        login_request("held"),
        Some(Hold {
            at_call: 3,
            entered: entered_tx,
            release: release_rx,
        }),
    );
    let pid = worker.pid;
    entered_rx.recv_timeout(WAIT).unwrap();

    let data = thread::scope(|scope| {
        let request = scope.spawn(|| system.read_process_memory(pid, 0, 2));
        thread::sleep(Duration::from_millis(100));
        // still queued behind the call in progress
        assert!(!request.is_finished());
        release_tx.send(()).unwrap();
        request.join().unwrap()
    });
    assert_eq!(data.unwrap(), Bytes::from_static(b"\x10\x20"));
    assert!(system.process_info(pid).is_some());

    listener.shutdown();
    system.shutdown();
    worker.join();
}
