/*!
 * Synchronous Calls
 *
 * A call writes one request and then reads until the matching acknowledge
 * arrives. Any other frame read in between is an unsolicited service
 * request from the worker; it is dispatched and answered before the wait
 * resumes.
 */

use super::dispatch::{dispatch, DispatchContext, DispatchOutcome};
use super::transport::Transport;
use super::wire::{self, Frame, Reply, Request};
use crate::core::errors::{CallError, CallResult, TransportResult, WireResult};
use crate::core::limits::{BASE_ACK_SIZE, MAX_MESSAGE_SIZE};
use crate::core::Pid;
use bytes::BytesMut;
use std::time::Duration;
use tracing::{debug, trace};

/// One worker connection with its reusable wire buffers
pub struct Connection {
    transport: Box<dyn Transport>,
    rx: BytesMut,
    tx: BytesMut,
    pid: Option<Pid>,
    trace_wire: bool,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            rx: BytesMut::with_capacity(4096),
            tx: BytesMut::with_capacity(4096),
            pid: None,
            trace_wire: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_wire = enabled;
        self
    }

    /// Tag log output with the process this connection serves
    pub fn bind(&mut self, pid: Pid) {
        self.pid = Some(pid);
    }

    pub fn peer(&self) -> String {
        self.transport.peer()
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> TransportResult<()> {
        self.transport.set_read_timeout(timeout)
    }

    pub fn send_request(&mut self, request: &Request) -> WireResult<()> {
        self.tx.clear();
        let size = request.encode(&mut self.tx);
        self.flush(size)
    }

    pub fn send_reply(&mut self, reply: &Reply) -> WireResult<()> {
        self.tx.clear();
        let size = reply.encode(&mut self.tx);
        self.flush(size)
    }

    fn flush(&mut self, size: usize) -> WireResult<()> {
        if size > MAX_MESSAGE_SIZE {
            return Err(crate::core::errors::WireError::InvalidSize(size));
        }
        if self.trace_wire {
            let command = i32::from_le_bytes([self.tx[0], self.tx[1], self.tx[2], self.tx[3]]);
            trace!(pid = ?self.pid, dir = "tx", command, size, "wire");
        }
        wire::write_frame(self.transport.as_mut(), &self.tx[..size])
    }

    pub fn recv(&mut self) -> WireResult<Frame> {
        let frame = wire::read_frame(self.transport.as_mut(), &mut self.rx)?;
        if self.trace_wire {
            trace!(pid = ?self.pid, dir = "rx", command = frame.command, size = frame.size(), "wire");
        }
        Ok(frame)
    }

    pub fn close(&mut self) {
        debug!(pid = ?self.pid, peer = %self.transport.peer(), "closing worker connection");
        self.transport.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.transport.peer())
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// How a call ended
#[derive(Debug, Clone, PartialEq)]
pub enum Exchange {
    Reply(Reply),
    /// The worker logged out immediately; no acknowledge will follow
    ImmediateLogout,
}

/// Send `request` and serve nested requests until its acknowledge arrives
pub fn exchange(
    conn: &mut Connection,
    request: &Request,
    ctx: &DispatchContext<'_>,
) -> CallResult<Exchange> {
    let expected = request.command().code();
    conn.send_request(request)?;
    loop {
        let frame = conn.recv()?;
        if frame.command == expected && frame.size() >= BASE_ACK_SIZE {
            return Ok(Exchange::Reply(Reply::decode(&frame)?));
        }
        let nested = Request::decode(&frame)?;
        match dispatch(&nested, ctx) {
            DispatchOutcome::Reply(reply) => conn.send_reply(&reply)?,
            DispatchOutcome::ImmediateLogout(reply) => {
                // The worker may already be gone
                if let Err(e) = conn.send_reply(&reply) {
                    debug!(pid = %ctx.tcb.pid, error = %e, "logout acknowledge not delivered");
                }
                return Ok(Exchange::ImmediateLogout);
            }
            DispatchOutcome::Unexpected(code) => return Err(CallError::UnexpectedCommand(code)),
        }
    }
}

/// Acknowledge or failure code of a finished call
pub fn expect_success(reply: Reply) -> CallResult<Reply> {
    if reply.ret < 0 {
        Err(CallError::Failed(reply.ret))
    } else {
        Ok(reply)
    }
}
