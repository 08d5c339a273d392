/*!
 * Collaborator Interfaces
 *
 * Narrow seams to the subsystems the scheduling core consumes but does not
 * own: the variable blackboard, symbol resolution, the message sink,
 * virtual network channels, host memory, and compiled expressions.
 */

pub mod copy_list;
pub mod memory;

pub use copy_list::{CopyEntry, CopyLists};
pub use memory::{BbType, BbValue, MemoryBlackboard, SparseMemory};

use crate::core::errors::{CollabError, CollabResult};
use crate::core::{Pid, Vid};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Variable database shared by all processes
pub trait Blackboard: Send + Sync {
    /// Add (or join) a variable; returns its id
    fn add_variable(&self, pid: Pid, name: &str, ty: BbType, unit: &str) -> CollabResult<Vid>;

    /// Attach to an existing variable by name
    fn attach_variable(&self, pid: Pid, name: &str) -> CollabResult<(Vid, BbType)>;

    fn remove_variable(&self, pid: Pid, vid: Vid) -> CollabResult<()>;

    fn read(&self, vid: Vid) -> CollabResult<BbValue>;

    fn write(&self, pid: Pid, vid: Vid, value: BbValue) -> CollabResult<()>;

    fn name_of(&self, vid: Vid) -> Option<String>;

    /// Drop every variable reference held by `pid`; returns how many were dropped
    fn remove_all_for_process(&self, pid: Pid) -> usize;
}

/// Address/label resolution for external executables
pub trait SymbolTable: Send + Sync {
    fn label_by_address(&self, pid: Pid, address: u64) -> Option<String>;
    fn address_by_label(&self, pid: Pid, label: &str) -> Option<u64>;
}

/// Operator-facing messages
pub trait MessageSink: Send + Sync {
    fn write_message(&self, pid: Pid, text: &str);

    /// Blocking popup; returns the operator's answer code
    fn error_popup(&self, pid: Pid, level: i32, text: &str) -> i32;
}

/// Virtual network channels attached to external processes
pub trait VirtualNetwork: Send + Sync {
    fn open(&self, pid: Pid, ty: i32, channel: i32, size: i32) -> CollabResult<i32>;
    fn close(&self, pid: Pid, handle: i32) -> CollabResult<()>;
    fn close_all(&self, pid: Pid);
    /// Append frames queued for `pid` to the outgoing snapshot
    fn take_outgoing(&self, pid: Pid, out: &mut Vec<u8>);
    /// Consume frames the worker sent back
    fn deliver_incoming(&self, pid: Pid, timestamp: u64, data: &[u8]);
}

/// Host memory visible to workers through read/write memory requests
pub trait MemoryAccess: Send + Sync {
    fn read(&self, pid: Pid, address: u64, len: usize) -> CollabResult<Vec<u8>>;
    fn write(&self, pid: Pid, address: u64, data: &[u8]) -> CollabResult<()>;
}

/// Opaque compiled expression executed before/behind a process cycle
pub trait CompiledExpression: Send + Sync {
    fn execute(&self, pid: Pid);

    /// Called once when the expression is detached from `pid`
    fn release(&self, pid: Pid);
}

// ============================================================================
// Defaults
// ============================================================================

/// No symbol information available
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSymbols;

impl SymbolTable for NoSymbols {
    fn label_by_address(&self, _pid: Pid, _address: u64) -> Option<String> {
        None
    }

    fn address_by_label(&self, _pid: Pid, _label: &str) -> Option<u64> {
        None
    }
}

/// Routes worker messages into the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn write_message(&self, pid: Pid, text: &str) {
        info!(pid = %pid, "{}", text);
    }

    fn error_popup(&self, pid: Pid, level: i32, text: &str) -> i32 {
        match level {
            0 => info!(pid = %pid, level, "{}", text),
            1 => warn!(pid = %pid, level, "{}", text),
            _ => error!(pid = %pid, level, "{}", text),
        }
        0
    }
}

/// Virtual networking disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNetwork;

impl VirtualNetwork for NoNetwork {
    fn open(&self, _pid: Pid, _ty: i32, channel: i32, _size: i32) -> CollabResult<i32> {
        Err(CollabError::Rejected(format!(
            "virtual network disabled (channel {})",
            channel
        )))
    }

    fn close(&self, _pid: Pid, handle: i32) -> CollabResult<()> {
        Err(CollabError::Rejected(format!("unknown channel handle {}", handle)))
    }

    fn close_all(&self, _pid: Pid) {}

    fn take_outgoing(&self, _pid: Pid, _out: &mut Vec<u8>) {}

    fn deliver_incoming(&self, _pid: Pid, _timestamp: u64, _data: &[u8]) {}
}

// ============================================================================
// Services Bundle
// ============================================================================

/// Collaborators handed to the engine and dispatcher
#[derive(Clone)]
pub struct Services {
    pub blackboard: Arc<dyn Blackboard>,
    pub symbols: Arc<dyn SymbolTable>,
    pub messages: Arc<dyn MessageSink>,
    pub network: Arc<dyn VirtualNetwork>,
    pub memory: Arc<dyn MemoryAccess>,
}

impl Services {
    /// In-memory blackboard and host memory, no symbols, no network
    pub fn in_memory() -> Self {
        Self {
            blackboard: Arc::new(MemoryBlackboard::new()),
            symbols: Arc::new(NoSymbols),
            messages: Arc::new(TracingSink),
            network: Arc::new(NoNetwork),
            memory: Arc::new(SparseMemory::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_blackboard(mut self, blackboard: Arc<dyn Blackboard>) -> Self {
        self.blackboard = blackboard;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolTable>) -> Self {
        self.symbols = symbols;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_messages(mut self, messages: Arc<dyn MessageSink>) -> Self {
        self.messages = messages;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_network(mut self, network: Arc<dyn VirtualNetwork>) -> Self {
        self.network = network;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryAccess>) -> Self {
        self.memory = memory;
        self
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
