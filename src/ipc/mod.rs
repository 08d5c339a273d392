/*!
 * IPC Module
 * Worker transports, wire codec, login handshake and synchronous calls
 */

pub mod call;
pub mod client;
pub mod dispatch;
pub mod login;
pub mod transport;
pub mod wire;

// Re-export for convenience
pub use call::{exchange, expect_success, Connection, Exchange};
pub use client::{run_worker, WorkerClient, WorkerHandler};
pub use dispatch::{dispatch, sched_info, CycleSource, DispatchContext, DispatchOutcome};
pub use login::{serve_connection, Admission, LoginAcceptor, LoginListener, LoginRejection};
pub use transport::{TcpTransport, Transport};
#[cfg(unix)]
pub use transport::UnixTransport;
pub use wire::{Command, Frame, LoginRequest, Phase, PhaseCall, Reply, ReplyBody, Request, SchedInfo};
