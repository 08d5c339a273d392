/*!
 * Request Dispatch
 *
 * Command table for service requests a worker issues, either standalone or
 * nested inside a phase call. Handlers never fail the connection: collaborator
 * errors become negative result codes in the acknowledge.
 */

use super::wire::{Command, Reply, ReplyBody, Request, SchedInfo};
use crate::barrier::Participant;
use crate::collab::copy_list::{dir, CopyEntry};
use crate::collab::{BbType, BbValue, Services};
use crate::core::errors::{CollabError, CollabResult};
use crate::core::limits::MAX_MEMORY_BLOCK;
use crate::core::{SchedulerId, Vid};
use crate::process::Tcb;
use bytes::Bytes;
use tracing::{debug, warn};

const RET_ERR: i32 = -1;

/// Cycle counters the dispatcher reports back to workers
pub trait CycleSource: Send + Sync {
    fn scheduler_cycle(&self, id: SchedulerId) -> u64;
    fn main_cycle(&self) -> u64;
    fn period_ns(&self) -> u64;
    fn separate_ref_init(&self) -> bool;
}

/// Everything a handler may touch
pub struct DispatchContext<'a> {
    pub tcb: &'a Tcb,
    pub services: &'a Services,
    pub cycles: &'a dyn CycleSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Reply(Reply),
    /// Acknowledge the logout, then stop serving this worker
    ImmediateLogout(Reply),
    /// Not a service request; the caller decides what this means
    Unexpected(i32),
}

fn status<T>(ctx: &DispatchContext<'_>, command: Command, result: CollabResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            warn!(pid = %ctx.tcb.pid, ?command, error = %e, "service request failed");
            RET_ERR
        }
    }
}

/// Scheduling metadata of one process
pub fn sched_info(tcb: &Tcb, cycles: &dyn CycleSource) -> SchedInfo {
    let params = tcb.params();
    SchedInfo {
        scheduler_cycle: cycles.scheduler_cycle(tcb.scheduler),
        scheduler_period_ns: cycles.period_ns(),
        main_cycle: cycles.main_cycle(),
        process_calls: tcb.call_count(),
        process_divisor: params.divisor,
        process_delay: params.delay,
        separate_ref_init: cycles.separate_ref_init(),
    }
}

/// Handle one service request on behalf of `ctx.tcb`
pub fn dispatch(request: &Request, ctx: &DispatchContext<'_>) -> DispatchOutcome {
    let pid = ctx.tcb.pid;
    let command = request.command();
    let services = ctx.services;
    debug!(pid = %pid, ?command, "dispatching service request");

    let reply = match request {
        Request::Logout { immediately, .. } => {
            if *immediately {
                return DispatchOutcome::ImmediateLogout(Reply::ok(command));
            }
            match ctx.tcb.request_termination() {
                Ok(()) => Reply::ok(command),
                Err(e) => {
                    warn!(pid = %pid, error = %e, "logout refused");
                    Reply::status(command, RET_ERR)
                }
            }
        }

        Request::DereferenceAll => {
            let removed = ctx.tcb.copy_lists.lock().clear();
            for entry in removed {
                if let Err(e) = services.blackboard.remove_variable(pid, entry.vid) {
                    debug!(pid = %pid, vid = %entry.vid, error = %e, "dereference failed");
                }
            }
            Reply::ok(command)
        }

        Request::GetSchedInfo => {
            let info = sched_info(ctx.tcb, ctx.cycles);
            Reply::with_body(command, 0, ReplyBody::SchedInfo(info))
        }

        Request::LoopOut {
            barrier,
            position,
            pass,
        } => {
            let outcome = ctx.tcb.barriers.loop_out.walk_named(
                barrier,
                *position,
                Participant::Process(pid),
                *pass,
            );
            match outcome {
                Some(_) => Reply::ok(command),
                None => {
                    warn!(pid = %pid, barrier = %barrier, "loop-out barrier not configured");
                    Reply::status(command, RET_ERR)
                }
            }
        }

        Request::AddVariable {
            name,
            ty,
            unit,
            dir: flags,
            address,
        } => {
            let result = BbType::from_code(*ty)
                .ok_or(CollabError::UnknownType(*ty))
                .and_then(|bb_type| {
                    let vid = services.blackboard.add_variable(pid, name, bb_type, unit)?;
                    register_copy(ctx, vid, bb_type, *flags, *address)?;
                    Ok(vid)
                });
            match result {
                Ok(vid) => Reply::with_body(command, 0, ReplyBody::Vid(vid)),
                Err(e) => {
                    warn!(pid = %pid, name = %name, error = %e, "add variable failed");
                    Reply::with_body(command, RET_ERR, ReplyBody::Vid(Vid(-1)))
                }
            }
        }

        Request::AttachVariable {
            name,
            dir: flags,
            address,
        } => {
            let result = services
                .blackboard
                .attach_variable(pid, name)
                .and_then(|(vid, bb_type)| {
                    register_copy(ctx, vid, bb_type, *flags, *address)?;
                    Ok((vid, bb_type))
                });
            match result {
                Ok((vid, bb_type)) => Reply::with_body(
                    command,
                    0,
                    ReplyBody::Attach {
                        vid,
                        ty: bb_type.code(),
                    },
                ),
                Err(e) => {
                    warn!(pid = %pid, name = %name, error = %e, "attach variable failed");
                    Reply::with_body(command, RET_ERR, ReplyBody::Attach { vid: Vid(-1), ty: -1 })
                }
            }
        }

        Request::RemoveVariable { vid, address } => {
            ctx.tcb.copy_lists.lock().remove(*vid, *address);
            let result = services.blackboard.remove_variable(pid, *vid);
            Reply::status(command, status(ctx, command, result))
        }

        Request::GetLabelByAddress { address } => {
            match services.symbols.label_by_address(pid, *address) {
                Some(label) => Reply::with_body(command, 0, ReplyBody::Label(label)),
                None => Reply::with_body(command, RET_ERR, ReplyBody::Label(String::new())),
            }
        }

        Request::GetRefLabelByVid { vid } => match services.blackboard.name_of(*vid) {
            Some(label) => Reply::with_body(command, 0, ReplyBody::Label(label)),
            None => Reply::with_body(command, RET_ERR, ReplyBody::Label(String::new())),
        },

        Request::WriteToMsgFile { text } => {
            services.messages.write_message(pid, text);
            Reply::ok(command)
        }

        Request::ErrorPopup { level, text } => {
            let answer = services.messages.error_popup(pid, *level, text);
            Reply::status(command, answer)
        }

        Request::WriteVariable { vid, value } => {
            let result = services
                .blackboard
                .read(*vid)
                .and_then(|current| {
                    services
                        .blackboard
                        .write(pid, *vid, BbValue::from_f64(current.ty(), *value))
                });
            Reply::status(command, status(ctx, command, result))
        }

        Request::ReadVariable { vid } => match services.blackboard.read(*vid) {
            Ok(value) => Reply::with_body(command, 0, ReplyBody::Value(value.as_f64())),
            Err(e) => {
                debug!(pid = %pid, vid = %vid, error = %e, "read variable failed");
                Reply::with_body(command, RET_ERR, ReplyBody::Value(0.0))
            }
        },

        Request::OpenVirtualNetwork { ty, channel, size } => {
            match services.network.open(pid, *ty, *channel, *size) {
                Ok(handle) => Reply::status(command, handle),
                Err(e) => {
                    warn!(pid = %pid, channel, error = %e, "open virtual network failed");
                    Reply::status(command, RET_ERR)
                }
            }
        }

        Request::CloseVirtualNetwork { handle } => {
            let result = services.network.close(pid, *handle);
            Reply::status(command, status(ctx, command, result))
        }

        Request::ReadMemory { address, len } => {
            let len = *len as usize;
            if len > MAX_MEMORY_BLOCK {
                warn!(pid = %pid, len, "memory read exceeds transfer limit");
                Reply::with_body(command, RET_ERR, ReplyBody::Data(Bytes::new()))
            } else {
                match services.memory.read(pid, *address, len) {
                    Ok(data) => Reply::with_body(command, 0, ReplyBody::Data(Bytes::from(data))),
                    Err(e) => {
                        warn!(pid = %pid, address, error = %e, "memory read failed");
                        Reply::with_body(command, RET_ERR, ReplyBody::Data(Bytes::new()))
                    }
                }
            }
        }

        Request::WriteMemory { address, data } => {
            let result = services.memory.write(pid, *address, data);
            Reply::status(command, status(ctx, command, result))
        }

        // Host -> worker directions and handshake frames are never served here
        Request::Login(_)
        | Request::Kill
        | Request::Ping { .. }
        | Request::Call(_)
        | Request::ReferenceVariable { .. }
        | Request::DereferenceVariable { .. }
        | Request::WriteSectionToExe { .. } => {
            return DispatchOutcome::Unexpected(command.code());
        }
    };
    DispatchOutcome::Reply(reply)
}

/// Add a copy-list entry when the worker asked for one
fn register_copy(
    ctx: &DispatchContext<'_>,
    vid: Vid,
    bb_type: BbType,
    flags: u32,
    address: u64,
) -> CollabResult<()> {
    if flags & dir::ADD_COPY_LIST == 0 {
        return Ok(());
    }
    let entry = CopyEntry {
        vid,
        address,
        bb_type,
        pipe_type: bb_type,
        dir: flags & dir::READ_WRITE,
    };
    match ctx.tcb.copy_lists.lock().insert(entry) {
        Ok(_) => Ok(()),
        Err(e) => {
            // Undo the blackboard side so the worker sees a clean failure
            let _ = ctx.services.blackboard.remove_variable(ctx.tcb.pid, vid);
            Err(e)
        }
    }
}
