/*!
 * Synchronous Call Tests
 * Nested service requests, logout and disconnects inside a phase call
 */

use crate::common::{idle_tcb, tcp_pair, Cycles};
use bytes::Bytes;
use pretty_assertions::assert_eq;
use sched_core::collab::Services;
use sched_core::ipc::wire::{Phase, PhaseCall, ReplyBody, Request};
use sched_core::ipc::{exchange, expect_success, DispatchContext, Exchange};
use sched_core::{CallError, Pid};
use std::thread;

fn cyclic(cycle: u64) -> Request {
    Request::Call(PhaseCall {
        phase: Phase::Cyclic,
        cycle,
        snapshot: Bytes::new(),
        vnet: Bytes::new(),
    })
}

#[test]
fn test_read_memory_served_before_cyclic_ack() {
    let (mut host, mut worker) = tcp_pair();
    let services = Services::in_memory();
    services.memory.write(Pid(65), 0x1000, &[1, 2, 3, 4]).unwrap();

    let handle = thread::spawn(move || {
        let call = match worker.next_request().unwrap() {
            Request::Call(call) => call,
            other => panic!("expected a phase call, got {:?}", other),
        };
        assert_eq!(call.cycle, 7);
        let reply = worker
            .request(&Request::ReadMemory {
                address: 0x1000,
                len: 4,
            })
            .unwrap();
        assert_eq!(reply.body, ReplyBody::Data(Bytes::from_static(&[1, 2, 3, 4])));
        worker
            .answer_call(&call, 0, Bytes::from_static(b"snap"))
            .unwrap();
    });

    let tcb = idle_tcb(65, "worker");
    let ctx = DispatchContext {
        tcb: &tcb,
        services: &services,
        cycles: &Cycles,
    };
    let outcome = exchange(&mut host, &cyclic(7), &ctx).unwrap();
    handle.join().unwrap();

    match outcome {
        Exchange::Reply(reply) => {
            assert_eq!(reply.ret, 0);
            assert_eq!(
                reply.body,
                ReplyBody::Call {
                    snapshot: Bytes::from_static(b"snap"),
                    vnet: Bytes::new(),
                }
            );
        }
        other => panic!("expected an acknowledge, got {:?}", other),
    }
}

#[test]
fn test_immediate_logout_ends_call() {
    let (mut host, mut worker) = tcp_pair();
    let services = Services::in_memory();

    let handle = thread::spawn(move || {
        worker.next_request().unwrap();
        worker.logout(true).unwrap();
        assert!(worker.is_logged_out());
    });

    let tcb = idle_tcb(66, "leaver");
    let ctx = DispatchContext {
        tcb: &tcb,
        services: &services,
        cycles: &Cycles,
    };
    let outcome = exchange(&mut host, &cyclic(1), &ctx).unwrap();
    handle.join().unwrap();
    assert_eq!(outcome, Exchange::ImmediateLogout);
}

#[test]
fn test_disconnect_during_call() {
    let (mut host, mut worker) = tcp_pair();
    let services = Services::in_memory();

    let handle = thread::spawn(move || {
        worker.next_request().unwrap();
        worker.close();
    });

    let tcb = idle_tcb(67, "crasher");
    let ctx = DispatchContext {
        tcb: &tcb,
        services: &services,
        cycles: &Cycles,
    };
    let err = exchange(&mut host, &cyclic(1), &ctx).unwrap_err();
    handle.join().unwrap();
    assert!(err.is_disconnect(), "{:?}", err);
}

#[test]
fn test_negative_ack_is_failure() {
    let (mut host, mut worker) = tcp_pair();
    let services = Services::in_memory();

    let handle = thread::spawn(move || {
        if let Request::Call(call) = worker.next_request().unwrap() {
            worker.answer_call(&call, -3, Bytes::new()).unwrap();
        }
    });

    let tcb = idle_tcb(68, "failing");
    let ctx = DispatchContext {
        tcb: &tcb,
        services: &services,
        cycles: &Cycles,
    };
    let outcome = exchange(&mut host, &cyclic(2), &ctx).unwrap();
    handle.join().unwrap();
    let Exchange::Reply(reply) = outcome else {
        panic!("expected an acknowledge");
    };
    assert_eq!(expect_success(reply), Err(CallError::Failed(-3)));
}
