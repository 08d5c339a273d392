/*!
 * Scripted external worker used by the scheduler tests
 */

#![allow(dead_code)]

use crate::common::{connect, login_request};
use bytes::Bytes;
use parking_lot::Mutex;
use sched_core::ipc::wire::{Command, LoginRequest, Phase, PhaseCall, Reply, ReplyBody, Request};
use sched_core::ipc::{client, run_worker, WorkerClient, WorkerHandler};
use sched_core::Pid;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

/// What the worker saw, shared with the test thread
#[derive(Default)]
pub struct Journal {
    pub phases: Mutex<Vec<Phase>>,
    pub cyclic: AtomicU64,
}

impl Journal {
    pub fn phases(&self) -> Vec<Phase> {
        self.phases.lock().clone()
    }

    pub fn cyclic(&self) -> u64 {
        self.cyclic.load(Ordering::SeqCst)
    }
}

/// Blocks inside one cyclic call until released
pub struct Hold {
    pub at_call: u64,
    pub entered: mpsc::Sender<()>,
    pub release: mpsc::Receiver<()>,
}

struct Scripted {
    journal: Arc<Journal>,
    hold: Option<Hold>,
    memory: Bytes,
}

impl WorkerHandler for Scripted {
    fn call(&mut self, _client: &mut WorkerClient, call: &PhaseCall) -> (i32, Bytes) {
        self.journal.phases.lock().push(call.phase);
        if call.phase == Phase::Cyclic {
            let n = self.journal.cyclic.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hold.as_ref().is_some_and(|h| h.at_call == n) {
                if let Some(hold) = self.hold.take() {
                    hold.entered.send(()).unwrap();
                    hold.release.recv().unwrap();
                }
            }
        }
        (0, Bytes::new())
    }

    fn host_request(&mut self, request: &Request) -> Reply {
        match request {
            Request::ReadMemory { len, .. } => {
                let data = self.memory.slice(..(*len as usize).min(self.memory.len()));
                Reply::with_body(Command::ReadMemory, 0, ReplyBody::Data(data))
            }
            Request::WriteSectionToExe { .. } => Reply::status(Command::WriteSectionToExe, -1),
            other => client::default_reply(other),
        }
    }
}

pub struct Worker {
    pub pid: Pid,
    pub journal: Arc<Journal>,
    handle: JoinHandle<u64>,
}

impl Worker {
    pub fn spawn(addr: SocketAddr, name: &str) -> Self {
        Self::spawn_with(addr, login_request(name), None)
    }

    pub fn spawn_with(addr: SocketAddr, request: LoginRequest, hold: Option<Hold>) -> Self {
        let mut client = connect(addr);
        let pid = client.login(request).unwrap();
        client.set_read_timeout(None).unwrap();
        let journal = Arc::new(Journal::default());
        let mut handler = Scripted {
            journal: journal.clone(),
            hold,
            memory: Bytes::from_static(b"\x10\x20\x30\x40"),
        };
        let handle = thread::spawn(move || run_worker(&mut client, &mut handler).unwrap_or(0));
        Self {
            pid,
            journal,
            handle,
        }
    }

    /// Calls answered before the host sent its kill notice
    pub fn join(self) -> u64 {
        self.handle.join().unwrap()
    }
}
