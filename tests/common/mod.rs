/*!
 * Shared test fixtures
 */

#![allow(dead_code)]

use sched_core::barrier::ProcessBarriers;
use sched_core::core::limits::PROTOCOL_VERSION;
use sched_core::ipc::wire::LoginRequest;
use sched_core::ipc::{Connection, CycleSource, TcpTransport, WorkerClient};
use sched_core::process::Tcb;
use sched_core::{InternalProcess, PhaseContext, Pid, SchedulerId, SchedulingParams};
use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

/// Fixed cycle counters for dispatcher tests
pub struct Cycles;

impl CycleSource for Cycles {
    fn scheduler_cycle(&self, _id: SchedulerId) -> u64 {
        42
    }

    fn main_cycle(&self) -> u64 {
        42
    }

    fn period_ns(&self) -> u64 {
        1_000_000
    }

    fn separate_ref_init(&self) -> bool {
        false
    }
}

pub struct Idle;

impl InternalProcess for Idle {
    fn cyclic(&mut self, _ctx: &PhaseContext<'_>) {}
}

pub fn params(priority: i32, divisor: i32, delay: i32) -> SchedulingParams {
    SchedulingParams {
        priority,
        divisor,
        delay,
        call_timeout: Duration::from_secs(5),
    }
}

pub fn idle_tcb(pid: i32, name: &str) -> Tcb {
    Tcb::internal(
        Pid(pid),
        name,
        SchedulerId::MAIN,
        params(100, 1, 0),
        ProcessBarriers::default(),
        Box::new(Idle),
    )
}

/// Host connection and worker client joined over loopback TCP
pub fn tcp_pair() -> (Connection, WorkerClient) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let worker = WorkerClient::connect_tcp(addr).unwrap();
    let (stream, _) = listener.accept().unwrap();
    let host = Connection::new(Box::new(TcpTransport::new(stream).unwrap()));
    (host, worker)
}

pub fn login_request(name: &str) -> LoginRequest {
    LoginRequest::new(name, format!("{}.exe", name), PROTOCOL_VERSION)
}

pub fn connect(addr: SocketAddr) -> WorkerClient {
    let mut client = WorkerClient::connect_tcp(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    client
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
