/*!
 * Snapshot Tests
 * Copy-list variables carried through phase calls by an echoing worker
 */

use crate::common::{connect, login_request, wait_until};
use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sched_core::collab::copy_list::dir;
use sched_core::collab::{BbType, BbValue};
use sched_core::ipc::wire::{Phase, PhaseCall, ReplyBody, Request};
use sched_core::ipc::{run_worker, WorkerClient, WorkerHandler};
use sched_core::{CoreConfig, Pid, ProcessState, SchedulerId, SchedulerSystem, Vid};
use serial_test::serial;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

/// Publishes its variables during reference, then answers every cyclic
/// call with the snapshot it was handed
struct Echo {
    variables: Vec<(&'static str, BbType, u32)>,
    vids: Arc<Mutex<Vec<Vid>>>,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl WorkerHandler for Echo {
    fn call(&mut self, client: &mut WorkerClient, call: &PhaseCall) -> (i32, Bytes) {
        match call.phase {
            Phase::Reference => {
                for (i, (name, ty, flags)) in self.variables.iter().enumerate() {
                    let reply = client
                        .request(&Request::AddVariable {
                            name: (*name).to_owned(),
                            ty: ty.code(),
                            unit: String::new(),
                            dir: flags | dir::ADD_COPY_LIST,
                            address: 0x100 + 8 * i as u64,
                        })
                        .unwrap();
                    let ReplyBody::Vid(vid) = reply.body else {
                        panic!("expected a vid for {}", name);
                    };
                    self.vids.lock().push(vid);
                }
                (0, Bytes::new())
            }
            Phase::Cyclic => {
                self.seen.lock().push(call.snapshot.len());
                (0, call.snapshot.clone())
            }
            _ => (0, Bytes::new()),
        }
    }
}

struct EchoWorker {
    pid: Pid,
    vids: Arc<Mutex<Vec<Vid>>>,
    seen: Arc<Mutex<Vec<usize>>>,
    handle: JoinHandle<u64>,
}

impl EchoWorker {
    fn spawn(addr: SocketAddr, name: &str, variables: Vec<(&'static str, BbType, u32)>) -> Self {
        let mut client = connect(addr);
        let pid = client.login(login_request(name)).unwrap();
        client.set_read_timeout(None).unwrap();
        let vids = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handler = Echo {
            variables,
            vids: vids.clone(),
            seen: seen.clone(),
        };
        let handle = thread::spawn(move || run_worker(&mut client, &mut handler).unwrap_or(0));
        Self {
            pid,
            vids,
            seen,
            handle,
        }
    }

    fn vids(&self) -> Vec<Vid> {
        self.vids.lock().clone()
    }

    fn seen(&self) -> Vec<usize> {
        self.seen.lock().clone()
    }
}

fn paused_system() -> (SchedulerSystem, sched_core::LoginListener, SocketAddr) {
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

fn step(system: &SchedulerSystem, cycles: u64) {
    let before = system.scheduler_cycle(SchedulerId::MAIN).unwrap();
    system.step(cycles);
    assert!(wait_until(WAIT, || system.is_paused()
        && system.scheduler_cycle(SchedulerId::MAIN).unwrap() == before + cycles));
}

fn values(system: &SchedulerSystem, vids: &[Vid]) -> Vec<BbValue> {
    let bb = &system.services().blackboard;
    vids.iter().map(|vid| bb.read(*vid).unwrap()).collect()
}

#[test]
#[serial]
fn test_echoed_snapshot_leaves_blackboard_unchanged() {
    let (system, listener, addr) = paused_system();
    let worker = EchoWorker::spawn(
        addr,
        "echo",
        vec![
            ("echo.speed", BbType::Double, dir::READ_WRITE),
            ("echo.count", BbType::DWord, dir::READ_WRITE),
            ("echo.gear", BbType::Word, dir::READ_WRITE),
            ("echo.flag", BbType::UByte, dir::READ_WRITE),
        ],
    );
    assert!(wait_until(WAIT, || {
        system.process_info(worker.pid).and_then(|i| i.state) == Some(ProcessState::Active)
    }));
    let vids = worker.vids();
    assert_eq!(vids.len(), 4);

    let bb = system.services().blackboard.clone();
    for round in [
        [BbValue::F64(-12.625), BbValue::I32(-70_000), BbValue::I16(-3), BbValue::U8(0xA5)],
        [BbValue::F64(1e300), BbValue::I32(i32::MAX), BbValue::I16(i16::MIN), BbValue::U8(0)],
    ] {
        for (vid, value) in vids.iter().zip(round) {
            bb.write(worker.pid, *vid, value).unwrap();
        }
        let calls = worker.seen().len();
        step(&system, 4);
        assert_eq!(worker.seen().len(), calls + 4);
        assert_eq!(values(&system, &vids), round.to_vec());
    }
    // 8 + 4 + 2 + 1 bytes each way
    assert!(worker.seen().iter().all(|len| *len == 15));
    assert!(system.process_info(worker.pid).is_some());

    listener.shutdown();
    system.shutdown();
    worker.handle.join().unwrap();
}

#[test]
#[serial]
fn test_verbatim_echo_rejected_when_lists_differ() {
    let (system, listener, addr) = paused_system();
    let worker = EchoWorker::spawn(
        addr,
        "mixed",
        vec![
            ("mixed.input", BbType::Double, dir::READ),
            ("mixed.output", BbType::DWord, dir::WRITE),
        ],
    );
    assert!(wait_until(WAIT, || {
        system.process_info(worker.pid).and_then(|i| i.state) == Some(ProcessState::Active)
    }));
    let vids = worker.vids();
    let bb = system.services().blackboard.clone();
    bb.write(worker.pid, vids[0], BbValue::F64(2.5)).unwrap();
    bb.write(worker.pid, vids[1], BbValue::I32(7)).unwrap();

    let calls = worker.seen().len();
    step(&system, 3);
    // the worker gets 8 bytes and returns them; the host expects 4
    assert_eq!(worker.seen()[calls..], [8, 8, 8]);
    assert_eq!(values(&system, &vids), vec![BbValue::F64(2.5), BbValue::I32(7)]);
    assert_eq!(
        system.process_info(worker.pid).and_then(|i| i.state),
        Some(ProcessState::Active)
    );

    listener.shutdown();
    system.shutdown();
    worker.handle.join().unwrap();
}
