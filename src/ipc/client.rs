/*!
 * Worker Client
 * The external side of the protocol: handshake, phase answers, service calls
 */

use super::call::Connection;
use super::transport::{TcpTransport, Transport};
use super::wire::{login_ret, Command, LoginRequest, PhaseCall, Reply, ReplyBody, Request};
use crate::core::errors::{CallError, CallResult, TransportResult};
use crate::core::Pid;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One worker connection as seen from the worker
#[derive(Debug)]
pub struct WorkerClient {
    conn: Connection,
    pid: Option<Pid>,
    logged_out: bool,
}

impl WorkerClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            conn: Connection::new(transport),
            pid: None,
            logged_out: false,
        }
    }

    pub fn connect_tcp(addr: SocketAddr) -> TransportResult<Self> {
        Ok(Self::new(Box::new(TcpTransport::connect(addr, CONNECT_TIMEOUT)?)))
    }

    #[cfg(unix)]
    pub fn connect_unix(path: &std::path::Path) -> TransportResult<Self> {
        Ok(Self::new(Box::new(super::transport::UnixTransport::connect(path)?)))
    }

    #[inline]
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> TransportResult<()> {
        self.conn.set_read_timeout(timeout)
    }

    /// Liveness check; returns the host's protocol version
    pub fn ping(mut self, version: i32) -> CallResult<i32> {
        let reply = self.request(&Request::Ping { version })?;
        self.conn.close();
        match reply.body {
            ReplyBody::Ping { version } => Ok(version),
            other => Err(CallError::Protocol(format!("ping answered with {:?}", other))),
        }
    }

    /// Handshake; a rejection surfaces as `CallError::Failed(code)`
    pub fn login(&mut self, request: LoginRequest) -> CallResult<Pid> {
        let reply = self.request(&Request::Login(request))?;
        match reply.body {
            ReplyBody::Login { pid, .. } if reply.ret == login_ret::OK => {
                self.pid = Some(pid);
                self.conn.bind(pid);
                Ok(pid)
            }
            ReplyBody::Login { .. } => Err(CallError::Failed(reply.ret)),
            other => Err(CallError::Protocol(format!("login answered with {:?}", other))),
        }
    }

    /// Block until the host sends the next request (phase call or kill)
    pub fn next_request(&mut self) -> CallResult<Request> {
        let frame = self.conn.recv()?;
        Ok(Request::decode(&frame)?)
    }

    pub fn reply(&mut self, reply: &Reply) -> CallResult<()> {
        Ok(self.conn.send_reply(reply)?)
    }

    /// Acknowledge a phase call with the worker's outgoing snapshot
    pub fn answer_call(&mut self, call: &PhaseCall, ret: i32, snapshot: Bytes) -> CallResult<()> {
        self.reply(&Reply::with_body(
            call.phase.command(),
            ret,
            ReplyBody::Call {
                snapshot,
                vnet: Bytes::new(),
            },
        ))
    }

    /// Issue a service request and wait for its acknowledge
    pub fn request(&mut self, request: &Request) -> CallResult<Reply> {
        let expected = request.command();
        self.conn.send_request(request)?;
        let frame = self.conn.recv()?;
        if frame.command != expected.code() {
            return Err(CallError::UnexpectedCommand(frame.command));
        }
        Ok(Reply::decode(&frame)?)
    }

    /// Log out from inside a phase call
    ///
    /// An immediate logout ends the current call on the host side; the
    /// worker must not acknowledge the call afterwards.
    pub fn logout(&mut self, immediately: bool) -> CallResult<()> {
        let pid = self.pid.unwrap_or(Pid(-1));
        let reply = self.request(&Request::Logout { pid, immediately })?;
        if reply.ret < 0 {
            return Err(CallError::Failed(reply.ret));
        }
        self.logged_out = immediately;
        Ok(())
    }

    /// True after an immediate logout
    #[inline]
    pub fn is_logged_out(&self) -> bool {
        self.logged_out
    }

    pub fn close(&mut self) {
        self.conn.close();
    }
}

/// Phase function table driven by [`run_worker`]
pub trait WorkerHandler {
    /// Returns the result code and the outgoing snapshot
    fn call(&mut self, client: &mut WorkerClient, call: &PhaseCall) -> (i32, Bytes);

    /// Host-initiated request outside a phase call (memory access, references)
    fn host_request(&mut self, request: &Request) -> Reply {
        default_reply(request)
    }
}

/// Serve phase calls until the host sends a kill notice or disconnects
///
/// Returns the number of calls answered.
pub fn run_worker(client: &mut WorkerClient, handler: &mut dyn WorkerHandler) -> CallResult<u64> {
    let mut answered = 0;
    loop {
        let request = match client.next_request() {
            Ok(request) => request,
            Err(e) if e.is_disconnect() => return Ok(answered),
            Err(e) => return Err(e),
        };
        match request {
            Request::Kill => return Ok(answered),
            Request::Call(call) => {
                let (ret, snapshot) = handler.call(client, &call);
                if client.is_logged_out() {
                    client.close();
                    return Ok(answered);
                }
                client.answer_call(&call, ret, snapshot)?;
                answered += 1;
            }
            other => {
                let reply = handler.host_request(&other);
                client.reply(&reply)?;
            }
        }
    }
}

/// Success acknowledge with an empty body of the right shape
pub fn default_reply(request: &Request) -> Reply {
    let command = request.command();
    let body = match command {
        Command::ReadMemory => ReplyBody::Data(Bytes::new()),
        Command::ReferenceVariable => ReplyBody::Vid(crate::core::Vid(0)),
        _ => ReplyBody::Empty,
    };
    Reply::with_body(command, 0, body)
}
