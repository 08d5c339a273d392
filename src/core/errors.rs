/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 *
 * Internal-consistency violations (re-entrant lock, releasing a lock held by
 * another thread, unknown process state) are kept as dedicated variants and
 * flagged by `is_critical()`; everything else is an environmental failure.
 */

use super::types::InlineString;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PID registry / retire pool errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum RegistryError {
    #[error("No free PID for process {0}")]
    #[diagnostic(
        code(registry::no_free_pid),
        help("All slots are in use or still retiring. Terminate unused processes or retry later.")
    )]
    NoFreePid(InlineString),

    #[error("Process {0} is already running")]
    #[diagnostic(
        code(registry::already_running),
        help("Process names are unique while the process is valid.")
    )]
    AlreadyRunning(InlineString),

    #[error("PID {0} is not registered")]
    #[diagnostic(code(registry::not_found))]
    NotFound(i32),
}

/// Exclusive-access lock errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LockError {
    #[error("Timed out locking process {0}")]
    #[diagnostic(
        code(lock::timeout),
        help("The process stayed inside its cycle longer than the wait budget.")
    )]
    Timeout(i32),

    #[error("Locking process {0} aborted by operator")]
    #[diagnostic(code(lock::aborted))]
    Aborted(i32),

    #[error("Process {0} is already locked by the calling thread")]
    #[diagnostic(
        code(lock::reentrant),
        severity(Error),
        help("Internal error: a lock must be released before it is taken again.")
    )]
    Reentrant(i32),

    #[error("Process {0} is not locked by the calling thread")]
    #[diagnostic(
        code(lock::not_holder),
        severity(Error),
        help("Internal error: only the holding thread may release the lock.")
    )]
    NotHolder(i32),

    #[error("Process {0} not found")]
    #[diagnostic(code(lock::not_found))]
    NotFound(i32),
}

/// Byte-stream transport errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum TransportError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(transport::io))]
    Io(String),

    #[error("Connection closed by peer")]
    #[diagnostic(code(transport::closed))]
    Closed,

    #[error("Cannot bind listener: {0}")]
    #[diagnostic(
        code(transport::bind),
        help("Check that the port or socket path is free.")
    )]
    Bind(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// Frame codec errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum WireError {
    #[error("Frame truncated: need {need} bytes, have {have}")]
    #[diagnostic(code(wire::truncated))]
    Truncated { need: usize, have: usize },

    #[error("Invalid frame size {0}")]
    #[diagnostic(
        code(wire::invalid_size),
        help("Frames must hold at least a header and stay below the buffer size.")
    )]
    InvalidSize(usize),

    #[error("Unknown command code {0}")]
    #[diagnostic(code(wire::unknown_command))]
    UnknownCommand(i32),

    #[error("Field {field} is {len} bytes, limit is {max}")]
    #[diagnostic(code(wire::field_too_long))]
    FieldTooLong {
        field: InlineString,
        len: usize,
        max: usize,
    },

    #[error("Field {0} is not valid UTF-8")]
    #[diagnostic(code(wire::invalid_string))]
    InvalidString(InlineString),

    #[error("Trailing {0} bytes after payload")]
    #[diagnostic(code(wire::trailing_bytes))]
    TrailingBytes(usize),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of a synchronous call to an external worker
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum CallError {
    #[error("Worker disconnected: {0}")]
    #[diagnostic(
        code(call::disconnected),
        help("The external process closed its connection; it is removed without a kill notice.")
    )]
    Disconnected(String),

    #[error("Protocol violation: {0}")]
    #[diagnostic(code(call::protocol))]
    Protocol(String),

    #[error("Unexpected command {0} during call")]
    #[diagnostic(code(call::unexpected_command))]
    UnexpectedCommand(i32),

    #[error("Reply carries {got} bytes, {requested} were requested")]
    #[diagnostic(code(call::reply_too_large))]
    ReplyTooLarge { requested: usize, got: usize },

    #[error("Writing incoming snapshot failed: {0}")]
    #[diagnostic(
        code(call::conversion_write),
        help("A copy-list entry could not be written back to the blackboard.")
    )]
    ConversionWrite(String),

    #[error("Worker answered with result code {0}")]
    #[diagnostic(code(call::failed))]
    Failed(i32),
}

impl CallError {
    /// True when the transport itself failed, so no kill notice can be sent
    #[inline]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CallError::Disconnected(_))
    }
}

impl From<WireError> for CallError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Transport(t) => CallError::Disconnected(t.to_string()),
            WireError::UnknownCommand(cmd) => CallError::UnexpectedCommand(cmd),
            other => CallError::Protocol(other.to_string()),
        }
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        CallError::Disconnected(err.to_string())
    }
}

/// Collaborator (blackboard, symbols, network) errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum CollabError {
    #[error("Variable {0} not found")]
    #[diagnostic(code(collab::variable_not_found))]
    VariableNotFound(i32),

    #[error("Variable {0} exists with a different type")]
    #[diagnostic(code(collab::type_mismatch))]
    TypeMismatch(InlineString),

    #[error("Unknown data type code {0}")]
    #[diagnostic(code(collab::unknown_type))]
    UnknownType(i32),

    #[error("Request rejected: {0}")]
    #[diagnostic(code(collab::rejected))]
    Rejected(String),
}

/// Scheduler engine and system errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SchedulerError {
    #[error("Scheduler {0} not found")]
    #[diagnostic(code(scheduler::not_found))]
    NotFound(InlineString),

    #[error("Cannot register more than {0} schedulers")]
    #[diagnostic(code(scheduler::too_many))]
    TooManySchedulers(usize),

    #[error("Schedulers are already running")]
    #[diagnostic(
        code(scheduler::already_started),
        help("Register schedulers before calling start().")
    )]
    AlreadyStarted,

    #[error("Process {0} not found in any scheduler")]
    #[diagnostic(
        code(scheduler::process_not_found),
        help("The process may have terminated or never existed. Check PID validity.")
    )]
    ProcessNotFound(i32),

    #[error("Process {0} is not an external process")]
    #[diagnostic(code(scheduler::not_external))]
    NotExternal(i32),

    #[error("Invalid process state: {0}")]
    #[diagnostic(
        code(scheduler::invalid_state),
        help("Operation cannot be performed in current process state.")
    )]
    InvalidState(InlineString),

    #[error("Login queue of scheduler {0} is full")]
    #[diagnostic(code(scheduler::login_queue_full))]
    LoginQueueFull(InlineString),

    #[error("Memory block of {0} bytes exceeds the transfer limit")]
    #[diagnostic(code(scheduler::memory_block_too_large))]
    MemoryBlockTooLarge(usize),

    #[error("Cannot spawn scheduler thread: {0}")]
    #[diagnostic(code(scheduler::spawn))]
    Spawn(String),

    #[error("Internal consistency violation: {0}")]
    #[diagnostic(
        code(scheduler::critical),
        severity(Error),
        help("This indicates a logic defect, not an environmental condition.")
    )]
    Critical(InlineString),
}

/// Configuration loading errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    #[diagnostic(code(config::io))]
    Io(String),

    #[error("Cannot parse config: {0}")]
    #[diagnostic(code(config::parse), help("The config file must be valid JSON."))]
    Parse(String),

    #[error("Invalid config value: {0}")]
    #[diagnostic(code(config::invalid))]
    Invalid(String),
}

/// Top-level error aggregating every area
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum CoreError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Collab(#[from] CollabError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl LockError {
    #[inline]
    pub fn is_critical(&self) -> bool {
        matches!(self, LockError::Reentrant(_) | LockError::NotHolder(_))
    }
}

impl SchedulerError {
    #[inline]
    pub fn is_critical(&self) -> bool {
        matches!(self, SchedulerError::Critical(_))
    }
}

impl CoreError {
    /// Internal-consistency violation rather than an environmental failure
    pub fn is_critical(&self) -> bool {
        match self {
            CoreError::Lock(e) => e.is_critical(),
            CoreError::Scheduler(e) => e.is_critical(),
            _ => false,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
pub type LockResult<T> = Result<T, LockError>;
pub type TransportResult<T> = Result<T, TransportError>;
pub type WireResult<T> = Result<T, WireError>;
pub type CallResult<T> = Result<T, CallError>;
pub type CollabResult<T> = Result<T, CollabError>;
pub type SchedulerResult<T> = Result<T, SchedulerError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type CoreResult<T> = Result<T, CoreError>;
