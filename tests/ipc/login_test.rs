/*!
 * Login Handshake Tests
 * Ping, version check and duplicate names through the TCP listener
 */

use crate::common::{connect, login_request, wait_until};
use pretty_assertions::assert_eq;
use sched_core::core::limits::PROTOCOL_VERSION;
use sched_core::ipc::wire::login_ret;
use sched_core::ipc::LoginRejection;
use sched_core::{CallError, LoginListener, ProcessState, SchedulerSystem};
use std::net::SocketAddr;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn listen() -> (SchedulerSystem, LoginListener, SocketAddr) {
    let system = SchedulerSystem::builder().build().unwrap();
    let listener = system.listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    (system, listener, addr)
}

#[test]
fn test_ping_reports_version() {
    let (system, listener, addr) = listen();
    let version = connect(addr).ping(PROTOCOL_VERSION).unwrap();
    assert_eq!(version, PROTOCOL_VERSION);
    listener.shutdown();
    system.shutdown();
}

#[test]
fn test_wrong_version_rejected() {
    let (system, listener, addr) = listen();
    let mut client = connect(addr);
    let mut request = login_request("old");
    request.version = PROTOCOL_VERSION - 1;
    assert_eq!(client.login(request), Err(CallError::Failed(login_ret::WRONG_VERSION)));
    assert!(system.get_pid_by_name("old").is_none());
    listener.shutdown();
    system.shutdown();
}

#[test]
fn test_login_queues_process_and_rejects_duplicate() {
    let (system, listener, addr) = listen();

    let mut first = connect(addr);
    let pid = first.login(login_request("model")).unwrap();
    assert_eq!(first.pid(), Some(pid));
    assert!(wait_until(Duration::from_secs(5), || system.get_pid_by_name("model") == Some(pid)));

    let info = system.process_info(pid).unwrap();
    assert_eq!(info.state, Some(ProcessState::Login));

    let mut second = connect(addr);
    assert_eq!(
        second.login(login_request("model")),
        Err(CallError::Failed(login_ret::ALREADY_RUNNING))
    );

    listener.shutdown();
    system.shutdown();
}

#[test]
fn test_concurrent_admissions_with_same_name() {
    let system = SchedulerSystem::builder().build().unwrap();
    let acceptor = system.login_acceptor();
    let start = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let acceptor = acceptor.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                acceptor.admit(login_request("twin")).err()
            })
        })
        .collect();

    let rejections: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(rejections.iter().filter(|r| r.is_none()).count(), 1);
    assert!(rejections
        .iter()
        .flatten()
        .all(|r| *r == LoginRejection::AlreadyRunning));
    // admitted but never committed, so only the registry knows the name
    assert!(system.is_running("twin"));
    assert!(system.get_pid_by_name("twin").is_none());
    system.shutdown();
}
