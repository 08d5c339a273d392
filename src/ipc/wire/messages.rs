/*!
 * Wire Messages
 * Tagged request/reply variants with validated variable-length fields
 */

use super::{Command, Decoder, Encoder, Frame};
use crate::barrier::Position;
use crate::core::errors::{WireError, WireResult};
use crate::core::limits::{
    LOGIN_RESERVED_LEN, MAX_BARRIER_NAME_LEN, MAX_EXECUTABLE_NAME_LEN, MAX_MEMORY_BLOCK,
    MAX_MESSAGE_SIZE, MAX_PROCESS_NAME_LEN,
};
use crate::core::{Pid, Vid};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const MAX_TEXT_LEN: usize = u16::MAX as usize;

// ============================================================================
// Login
// ============================================================================

/// Handshake sent by a worker on a fresh connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub version: i32,
    pub os_pid: i32,
    pub name: String,
    pub executable: String,
    pub dll_name: String,
    /// Position of this process inside its executable
    pub index: i32,
    /// Number of processes living inside the executable
    pub count: i32,
    /// -1 means "use the configured default"
    pub priority: i32,
    pub divisor: i32,
    pub delay: i32,
    pub debugger_attached: bool,
    pub machine: i32,
    pub ping_handles: [u64; 2],
    pub exe_base: u64,
    pub dll_base: u64,
    pub reserved: Bytes,
}

impl LoginRequest {
    pub fn new(name: impl Into<String>, executable: impl Into<String>, version: i32) -> Self {
        Self {
            version,
            os_pid: std::process::id() as i32,
            name: name.into(),
            executable: executable.into(),
            dll_name: String::new(),
            index: 0,
            count: 1,
            priority: -1,
            divisor: -1,
            delay: -1,
            debugger_attached: false,
            machine: 0,
            ping_handles: [0; 2],
            exe_base: 0,
            dll_base: 0,
            reserved: Bytes::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_group(mut self, index: i32, count: i32) -> Self {
        self.index = index;
        self.count = count;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_scheduling(mut self, priority: i32, divisor: i32, delay: i32) -> Self {
        self.priority = priority;
        self.divisor = divisor;
        self.delay = delay;
        self
    }

    fn encode_body(&self, enc: &mut Encoder<'_>) {
        enc.i32(self.version)
            .i32(self.os_pid)
            .str(&self.name)
            .str(&self.executable)
            .str(&self.dll_name)
            .i32(self.index)
            .i32(self.count)
            .i32(self.priority)
            .i32(self.divisor)
            .i32(self.delay)
            .i32(self.debugger_attached as i32)
            .i32(self.machine)
            .u64(self.ping_handles[0])
            .u64(self.ping_handles[1])
            .u64(self.exe_base)
            .u64(self.dll_base)
            .fixed(&self.reserved, LOGIN_RESERVED_LEN);
    }

    fn decode_body(dec: &mut Decoder) -> WireResult<Self> {
        Ok(Self {
            version: dec.i32()?,
            os_pid: dec.i32()?,
            name: dec.str("name", MAX_PROCESS_NAME_LEN)?,
            executable: dec.str("executable", MAX_EXECUTABLE_NAME_LEN)?,
            dll_name: dec.str("dll_name", MAX_EXECUTABLE_NAME_LEN)?,
            index: dec.i32()?,
            count: dec.i32()?,
            priority: dec.i32()?,
            divisor: dec.i32()?,
            delay: dec.i32()?,
            debugger_attached: dec.i32()? != 0,
            machine: dec.i32()?,
            ping_handles: [dec.u64()?, dec.u64()?],
            exe_base: dec.u64()?,
            dll_base: dec.u64()?,
            reserved: dec.fixed(LOGIN_RESERVED_LEN)?,
        })
    }
}

// ============================================================================
// Phase Calls
// ============================================================================

/// One of the four per-process phase functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reference,
    Init,
    Cyclic,
    Terminate,
}

impl Phase {
    pub const fn command(self) -> Command {
        match self {
            Phase::Reference => Command::CallReference,
            Phase::Init => Command::CallInit,
            Phase::Cyclic => Command::CallCyclic,
            Phase::Terminate => Command::CallTerminate,
        }
    }

    pub fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::CallReference => Some(Phase::Reference),
            Command::CallInit => Some(Phase::Init),
            Command::CallCyclic => Some(Phase::Cyclic),
            Command::CallTerminate => Some(Phase::Terminate),
            _ => None,
        }
    }
}

/// Host -> worker phase request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCall {
    pub phase: Phase,
    pub cycle: u64,
    /// Copy-list data for the read list
    pub snapshot: Bytes,
    /// Virtual network frames following the snapshot
    pub vnet: Bytes,
}

/// Scheduling metadata returned by GET_SCHED_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchedInfo {
    pub scheduler_cycle: u64,
    pub scheduler_period_ns: u64,
    pub main_cycle: u64,
    pub process_calls: u64,
    pub process_divisor: i32,
    pub process_delay: i32,
    pub separate_ref_init: bool,
}

// ============================================================================
// Requests
// ============================================================================

/// Every message that is not an acknowledge
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Login(LoginRequest),
    Logout { pid: Pid, immediately: bool },
    /// Fire-and-forget; no acknowledge follows
    Kill,
    Ping { version: i32 },
    Call(PhaseCall),
    DereferenceAll,
    GetSchedInfo,
    LoopOut { barrier: String, position: Position, pass: u8 },
    AddVariable { name: String, ty: i32, unit: String, dir: u32, address: u64 },
    RemoveVariable { vid: Vid, address: u64 },
    GetLabelByAddress { address: u64 },
    WriteToMsgFile { text: String },
    WriteVariable { vid: Vid, value: f64 },
    ReadVariable { vid: Vid },
    GetRefLabelByVid { vid: Vid },
    AttachVariable { name: String, dir: u32, address: u64 },
    ErrorPopup { level: i32, text: String },
    OpenVirtualNetwork { ty: i32, channel: i32, size: i32 },
    CloseVirtualNetwork { handle: i32 },
    ReadMemory { address: u64, len: u32 },
    WriteMemory { address: u64, data: Bytes },
    ReferenceVariable { address: u64, name: String, ty: i32, dir: u32 },
    DereferenceVariable { address: u64, name: String, ty: i32, dir: u32 },
    WriteSectionToExe { section: String },
}

fn position_code(position: Position) -> i32 {
    match position {
        Position::Before => 0,
        Position::Behind => 1,
    }
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Login(_) => Command::Login,
            Request::Logout { .. } => Command::Logout,
            Request::Kill => Command::Kill,
            Request::Ping { .. } => Command::Ping,
            Request::Call(call) => call.phase.command(),
            Request::DereferenceAll => Command::DereferenceAll,
            Request::GetSchedInfo => Command::GetSchedInfo,
            Request::LoopOut { .. } => Command::LoopOut,
            Request::AddVariable { .. } => Command::AddVariable,
            Request::RemoveVariable { .. } => Command::RemoveVariable,
            Request::GetLabelByAddress { .. } => Command::GetLabelByAddress,
            Request::WriteToMsgFile { .. } => Command::WriteToMsgFile,
            Request::WriteVariable { .. } => Command::WriteVariable,
            Request::ReadVariable { .. } => Command::ReadVariable,
            Request::GetRefLabelByVid { .. } => Command::GetRefLabelByVid,
            Request::AttachVariable { .. } => Command::AttachVariable,
            Request::ErrorPopup { .. } => Command::ErrorPopup,
            Request::OpenVirtualNetwork { .. } => Command::OpenVirtualNetwork,
            Request::CloseVirtualNetwork { .. } => Command::CloseVirtualNetwork,
            Request::ReadMemory { .. } => Command::ReadMemory,
            Request::WriteMemory { .. } => Command::WriteMemory,
            Request::ReferenceVariable { .. } => Command::ReferenceVariable,
            Request::DereferenceVariable { .. } => Command::DereferenceVariable,
            Request::WriteSectionToExe { .. } => Command::WriteSectionToExe,
        }
    }

    /// Append the encoded frame to `out`; returns its size
    pub fn encode(&self, out: &mut BytesMut) -> usize {
        let mut enc = Encoder::begin(out, self.command().code());
        match self {
            Request::Login(login) => login.encode_body(&mut enc),
            Request::Logout { pid, immediately } => {
                enc.i32(pid.raw()).i32(*immediately as i32);
            }
            Request::Kill | Request::DereferenceAll | Request::GetSchedInfo => {}
            Request::Ping { version } => {
                enc.i32(*version);
            }
            Request::Call(call) => {
                enc.u64(call.cycle).bytes(&call.snapshot).bytes(&call.vnet);
            }
            Request::LoopOut {
                barrier,
                position,
                pass,
            } => {
                enc.str(barrier).i32(position_code(*position)).i32(*pass as i32);
            }
            Request::AddVariable {
                name,
                ty,
                unit,
                dir,
                address,
            } => {
                enc.str(name).i32(*ty).str(unit).u32(*dir).u64(*address);
            }
            Request::RemoveVariable { vid, address } => {
                enc.i32(vid.0).u64(*address);
            }
            Request::GetLabelByAddress { address } => {
                enc.u64(*address);
            }
            Request::WriteToMsgFile { text } => {
                enc.str(text);
            }
            Request::WriteVariable { vid, value } => {
                enc.i32(vid.0).f64(*value);
            }
            Request::ReadVariable { vid } | Request::GetRefLabelByVid { vid } => {
                enc.i32(vid.0);
            }
            Request::AttachVariable { name, dir, address } => {
                enc.str(name).u32(*dir).u64(*address);
            }
            Request::ErrorPopup { level, text } => {
                enc.i32(*level).str(text);
            }
            Request::OpenVirtualNetwork { ty, channel, size } => {
                enc.i32(*ty).i32(*channel).i32(*size);
            }
            Request::CloseVirtualNetwork { handle } => {
                enc.i32(*handle);
            }
            Request::ReadMemory { address, len } => {
                enc.u64(*address).u32(*len);
            }
            Request::WriteMemory { address, data } => {
                enc.u64(*address).bytes(data);
            }
            Request::ReferenceVariable {
                address,
                name,
                ty,
                dir,
            }
            | Request::DereferenceVariable {
                address,
                name,
                ty,
                dir,
            } => {
                enc.u64(*address).str(name).i32(*ty).u32(*dir);
            }
            Request::WriteSectionToExe { section } => {
                enc.str(section);
            }
        }
        enc.finish()
    }

    pub fn decode(frame: &Frame) -> WireResult<Self> {
        let command = Command::from_code(frame.command)?;
        let mut dec = Decoder::new(frame.body.clone());
        let request = match command {
            Command::Login => Request::Login(LoginRequest::decode_body(&mut dec)?),
            Command::Logout => Request::Logout {
                pid: Pid(dec.i32()?),
                immediately: dec.i32()? != 0,
            },
            Command::Kill => Request::Kill,
            Command::Ping => Request::Ping { version: dec.i32()? },
            Command::CallReference
            | Command::CallInit
            | Command::CallCyclic
            | Command::CallTerminate => Request::Call(PhaseCall {
                phase: Phase::from_command(command).ok_or(WireError::UnknownCommand(frame.command))?,
                cycle: dec.u64()?,
                snapshot: dec.bytes("snapshot", MAX_MESSAGE_SIZE)?,
                vnet: dec.bytes("vnet", MAX_MESSAGE_SIZE)?,
            }),
            Command::DereferenceAll => Request::DereferenceAll,
            Command::GetSchedInfo => Request::GetSchedInfo,
            Command::LoopOut => Request::LoopOut {
                barrier: dec.str("barrier", MAX_BARRIER_NAME_LEN)?,
                position: if dec.i32()? == 0 {
                    Position::Before
                } else {
                    Position::Behind
                },
                pass: (dec.i32()? != 0) as u8,
            },
            Command::AddVariable => Request::AddVariable {
                name: dec.str("name", MAX_PROCESS_NAME_LEN)?,
                ty: dec.i32()?,
                unit: dec.str("unit", MAX_PROCESS_NAME_LEN)?,
                dir: dec.u32()?,
                address: dec.u64()?,
            },
            Command::RemoveVariable => Request::RemoveVariable {
                vid: Vid(dec.i32()?),
                address: dec.u64()?,
            },
            Command::GetLabelByAddress => Request::GetLabelByAddress { address: dec.u64()? },
            Command::WriteToMsgFile => Request::WriteToMsgFile {
                text: dec.str("text", MAX_TEXT_LEN)?,
            },
            Command::WriteVariable => Request::WriteVariable {
                vid: Vid(dec.i32()?),
                value: dec.f64()?,
            },
            Command::ReadVariable => Request::ReadVariable { vid: Vid(dec.i32()?) },
            Command::GetRefLabelByVid => Request::GetRefLabelByVid { vid: Vid(dec.i32()?) },
            Command::AttachVariable => Request::AttachVariable {
                name: dec.str("name", MAX_PROCESS_NAME_LEN)?,
                dir: dec.u32()?,
                address: dec.u64()?,
            },
            Command::ErrorPopup => Request::ErrorPopup {
                level: dec.i32()?,
                text: dec.str("text", MAX_TEXT_LEN)?,
            },
            Command::OpenVirtualNetwork => Request::OpenVirtualNetwork {
                ty: dec.i32()?,
                channel: dec.i32()?,
                size: dec.i32()?,
            },
            Command::CloseVirtualNetwork => Request::CloseVirtualNetwork { handle: dec.i32()? },
            Command::ReadMemory => Request::ReadMemory {
                address: dec.u64()?,
                len: dec.u32()?,
            },
            Command::WriteMemory => Request::WriteMemory {
                address: dec.u64()?,
                data: dec.bytes("data", MAX_MEMORY_BLOCK)?,
            },
            Command::ReferenceVariable => Request::ReferenceVariable {
                address: dec.u64()?,
                name: dec.str("name", MAX_PROCESS_NAME_LEN)?,
                ty: dec.i32()?,
                dir: dec.u32()?,
            },
            Command::DereferenceVariable => Request::DereferenceVariable {
                address: dec.u64()?,
                name: dec.str("name", MAX_PROCESS_NAME_LEN)?,
                ty: dec.i32()?,
                dir: dec.u32()?,
            },
            Command::WriteSectionToExe => Request::WriteSectionToExe {
                section: dec.str("section", MAX_PROCESS_NAME_LEN)?,
            },
        };
        dec.finish()?;
        Ok(request)
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Command-specific acknowledge payload following the result code
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Empty,
    Login { pid: Pid, version: i32 },
    Ping { version: i32 },
    Call { snapshot: Bytes, vnet: Bytes },
    Vid(Vid),
    Attach { vid: Vid, ty: i32 },
    Value(f64),
    Label(String),
    Data(Bytes),
    SchedInfo(SchedInfo),
}

/// Acknowledge frame
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub command: Command,
    pub ret: i32,
    pub body: ReplyBody,
}

impl Reply {
    #[inline]
    pub fn ok(command: Command) -> Self {
        Self::status(command, 0)
    }

    #[inline]
    pub fn status(command: Command, ret: i32) -> Self {
        Self {
            command,
            ret,
            body: ReplyBody::Empty,
        }
    }

    #[inline]
    pub fn with_body(command: Command, ret: i32, body: ReplyBody) -> Self {
        Self { command, ret, body }
    }

    pub fn encode(&self, out: &mut BytesMut) -> usize {
        let mut enc = Encoder::begin(out, self.command.code());
        enc.i32(self.ret);
        match &self.body {
            ReplyBody::Empty => {}
            ReplyBody::Login { pid, version } => {
                enc.i32(pid.raw()).i32(*version);
            }
            ReplyBody::Ping { version } => {
                enc.i32(*version);
            }
            ReplyBody::Call { snapshot, vnet } => {
                enc.bytes(snapshot).bytes(vnet);
            }
            ReplyBody::Vid(vid) => {
                enc.i32(vid.0);
            }
            ReplyBody::Attach { vid, ty } => {
                enc.i32(vid.0).i32(*ty);
            }
            ReplyBody::Value(v) => {
                enc.f64(*v);
            }
            ReplyBody::Label(label) => {
                enc.str(label);
            }
            ReplyBody::Data(data) => {
                enc.bytes(data);
            }
            ReplyBody::SchedInfo(info) => {
                enc.u64(info.scheduler_cycle)
                    .u64(info.scheduler_period_ns)
                    .u64(info.main_cycle)
                    .u64(info.process_calls)
                    .i32(info.process_divisor)
                    .i32(info.process_delay)
                    .i32(info.separate_ref_init as i32);
            }
        }
        enc.finish()
    }

    /// Decode an acknowledge; the body shape follows from the command code
    pub fn decode(frame: &Frame) -> WireResult<Self> {
        let command = Command::from_code(frame.command)?;
        let mut dec = Decoder::new(frame.body.clone());
        let ret = dec.i32()?;
        let body = match command {
            Command::Login => ReplyBody::Login {
                pid: Pid(dec.i32()?),
                version: dec.i32()?,
            },
            Command::Ping => ReplyBody::Ping { version: dec.i32()? },
            Command::CallReference
            | Command::CallInit
            | Command::CallCyclic
            | Command::CallTerminate => ReplyBody::Call {
                snapshot: dec.bytes("snapshot", MAX_MESSAGE_SIZE)?,
                vnet: dec.bytes("vnet", MAX_MESSAGE_SIZE)?,
            },
            Command::AddVariable | Command::ReferenceVariable => ReplyBody::Vid(Vid(dec.i32()?)),
            Command::AttachVariable => ReplyBody::Attach {
                vid: Vid(dec.i32()?),
                ty: dec.i32()?,
            },
            Command::ReadVariable => ReplyBody::Value(dec.f64()?),
            Command::GetLabelByAddress | Command::GetRefLabelByVid => {
                ReplyBody::Label(dec.str("label", MAX_TEXT_LEN)?)
            }
            Command::ReadMemory => ReplyBody::Data(dec.bytes("data", MAX_MEMORY_BLOCK)?),
            Command::GetSchedInfo => ReplyBody::SchedInfo(SchedInfo {
                scheduler_cycle: dec.u64()?,
                scheduler_period_ns: dec.u64()?,
                main_cycle: dec.u64()?,
                process_calls: dec.u64()?,
                process_divisor: dec.i32()?,
                process_delay: dec.i32()?,
                separate_ref_init: dec.i32()? != 0,
            }),
            _ => ReplyBody::Empty,
        };
        dec.finish()?;
        Ok(Self { command, ret, body })
    }
}
