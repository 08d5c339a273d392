/*!
 * Host Requests
 *
 * Requests the host side sends into an external worker outside the phase
 * calls: memory access, variable references and section write-back. Each
 * request takes the worker's group lock so it never overlaps a phase call.
 */

use super::system::SchedulerSystem;
use crate::core::errors::{CoreResult, SchedulerError};
use crate::core::limits::MAX_MEMORY_BLOCK;
use crate::core::{Pid, Vid};
use crate::ipc::call::{exchange, expect_success, Exchange};
use crate::ipc::dispatch::DispatchContext;
use crate::ipc::wire::{Reply, ReplyBody, Request};
use crate::monitoring::span_request;
use crate::process::{lock_group, KillMode, ProcessBody};
use bytes::Bytes;
use tracing::{debug, error, warn};

impl SchedulerSystem {
    /// Read a block of worker memory (at most `MAX_MEMORY_BLOCK` bytes)
    pub fn read_process_memory(&self, pid: Pid, address: u64, len: usize) -> CoreResult<Bytes> {
        if len > MAX_MEMORY_BLOCK {
            return Err(SchedulerError::MemoryBlockTooLarge(len).into());
        }
        let reply = self.host_exchange(
            "read_memory",
            pid,
            Request::ReadMemory {
                address,
                len: len as u32,
            },
        )?;
        match reply.body {
            ReplyBody::Data(data) => Ok(data),
            _ => Ok(Bytes::new()),
        }
    }

    pub fn write_process_memory(&self, pid: Pid, address: u64, data: &[u8]) -> CoreResult<()> {
        if data.len() > MAX_MEMORY_BLOCK {
            return Err(SchedulerError::MemoryBlockTooLarge(data.len()).into());
        }
        self.host_exchange(
            "write_memory",
            pid,
            Request::WriteMemory {
                address,
                data: Bytes::copy_from_slice(data),
            },
        )?;
        Ok(())
    }

    /// Ask the worker to publish a variable; returns the assigned id
    pub fn reference_variable(
        &self,
        pid: Pid,
        address: u64,
        name: &str,
        ty: i32,
        dir: u32,
    ) -> CoreResult<Vid> {
        let reply = self.host_exchange(
            "reference_variable",
            pid,
            Request::ReferenceVariable {
                address,
                name: name.to_owned(),
                ty,
                dir,
            },
        )?;
        match reply.body {
            ReplyBody::Vid(vid) => Ok(vid),
            _ => Ok(Vid(reply.ret)),
        }
    }

    pub fn dereference_variable(
        &self,
        pid: Pid,
        address: u64,
        name: &str,
        ty: i32,
        dir: u32,
    ) -> CoreResult<()> {
        self.host_exchange(
            "dereference_variable",
            pid,
            Request::DereferenceVariable {
                address,
                name: name.to_owned(),
                ty,
                dir,
            },
        )?;
        Ok(())
    }

    pub fn dereference_all(&self, pid: Pid) -> CoreResult<()> {
        self.host_exchange("dereference_all", pid, Request::DereferenceAll)?;
        Ok(())
    }

    pub fn write_section_to_exe(&self, pid: Pid, section: &str) -> CoreResult<()> {
        self.host_exchange(
            "write_section_to_exe",
            pid,
            Request::WriteSectionToExe {
                section: section.to_owned(),
            },
        )?;
        Ok(())
    }

    /// One locked request/acknowledge round trip with an external worker
    fn host_exchange(&self, name: &'static str, pid: Pid, request: Request) -> CoreResult<Reply> {
        let span = span_request(name, pid);
        let _entered = span.enter();
        let rt = &self.rt;
        let tcb = rt
            .table
            .get(pid)
            .ok_or(SchedulerError::ProcessNotFound(pid.raw()))?;
        let ProcessBody::External(slot) = &tcb.body else {
            return Err(SchedulerError::NotExternal(pid.raw()).into());
        };

        // a running phase call holds the group lock until the cycle ends
        let config = rt.config.get();
        let _guard = lock_group(
            rt.table.lock_group_of(&tcb),
            config.process.lock_timeout(),
            rt.lock_behavior,
            rt.prompt.as_ref(),
        )?;

        let mut slot = slot.lock();
        // killed while we waited
        let Some(conn) = slot.as_mut() else {
            return Err(SchedulerError::ProcessNotFound(pid.raw()).into());
        };
        let debugger = tcb.login.as_ref().is_some_and(|l| l.debugger_attached);
        conn.set_read_timeout((!debugger).then(|| tcb.params().call_timeout))?;

        let command = request.command();
        let ctx = DispatchContext {
            tcb: tcb.as_ref(),
            services: &rt.services,
            cycles: rt.as_ref(),
        };
        let result = exchange(conn, &request, &ctx);

        match result {
            Ok(Exchange::Reply(reply)) => {
                debug!(pid = %pid, ?command, ret = reply.ret, "host request acknowledged");
                let result = expect_success(reply);
                span.record_result(result.is_ok());
                Ok(result?)
            }
            Ok(Exchange::ImmediateLogout) => {
                warn!(pid = %pid, ?command, "process logged out during host request");
                tcb.request_kill(KillMode::Silent);
                Err(SchedulerError::ProcessNotFound(pid.raw()).into())
            }
            Err(e) => {
                let mode = if e.is_disconnect() {
                    KillMode::Silent
                } else {
                    KillMode::WithNotice
                };
                error!(pid = %pid, ?command, error = %e, "host request failed");
                span.record_result(false);
                tcb.request_kill(mode);
                Err(e.into())
            }
        }
    }
}
