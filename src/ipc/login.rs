/*!
 * Login Listener
 *
 * Accepts worker connections on a dedicated thread. Each connection sends
 * exactly one first frame: a bare ping (answered, then closed) or a login
 * handshake (validated, admitted, acknowledged, then handed to the owning
 * scheduler).
 *
 * # Graceful-with-Fallback Shutdown
 *
 * `shutdown()` raises the stop flag and joins the accept thread. Dropping
 * the listener without it does the same but logs a warning.
 */

use super::call::Connection;
use super::transport::{TcpTransport, Transport};
use super::wire::{login_ret, Command, LoginRequest, Reply, ReplyBody, Request};
use crate::core::errors::{CallError, CallResult, RegistryError, TransportError, TransportResult};
use crate::core::limits::PROTOCOL_VERSION;
use crate::core::Pid;
use log::{info, warn};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a login was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginRejection {
    NoFreePid,
    AlreadyRunning,
    WrongVersion,
}

impl LoginRejection {
    pub const fn ret_code(self) -> i32 {
        match self {
            LoginRejection::NoFreePid => login_ret::NO_FREE_PID,
            LoginRejection::AlreadyRunning => login_ret::ALREADY_RUNNING,
            LoginRejection::WrongVersion => login_ret::WRONG_VERSION,
        }
    }
}

impl From<RegistryError> for LoginRejection {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyRunning(_) => LoginRejection::AlreadyRunning,
            _ => LoginRejection::NoFreePid,
        }
    }
}

/// A login that passed validation and holds a freshly allocated PID
#[derive(Debug)]
pub struct Admission {
    pub pid: Pid,
    pub request: LoginRequest,
}

/// Decides about logins and takes over accepted connections
pub trait LoginAcceptor: Send + Sync {
    fn admit(&self, request: LoginRequest) -> Result<Admission, LoginRejection>;

    /// The acknowledge was delivered; the worker now belongs to a scheduler
    fn commit(&self, admission: Admission, connection: Connection);

    /// The acknowledge could not be delivered; release the PID again
    fn abort(&self, admission: Admission);
}

/// Handle one fresh connection up to the point it is handed over
pub fn serve_connection(
    transport: Box<dyn Transport>,
    acceptor: &dyn LoginAcceptor,
    trace_wire: bool,
) -> CallResult<()> {
    let mut conn = Connection::new(transport).with_trace(trace_wire);
    conn.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let frame = conn.recv()?;
    match Command::from_code(frame.command) {
        Ok(Command::Ping) => {
            debug!(peer = %conn.peer(), "ping");
            let reply = Reply::with_body(
                Command::Ping,
                0,
                ReplyBody::Ping {
                    version: PROTOCOL_VERSION,
                },
            );
            let sent = conn.send_reply(&reply);
            conn.close();
            sent.map_err(CallError::from)
        }
        Ok(Command::Login) => {
            // Version first: the rest of the layout may differ
            if frame.peek_i32() != Some(PROTOCOL_VERSION) {
                warn!(
                    "login from {} with protocol version {:?}, expected {}",
                    conn.peer(),
                    frame.peek_i32(),
                    PROTOCOL_VERSION
                );
                return reject(conn, LoginRejection::WrongVersion);
            }
            let request = match Request::decode(&frame)? {
                Request::Login(request) => request,
                other => return Err(CallError::UnexpectedCommand(other.command().code())),
            };
            let name = request.name.clone();
            let admission = match acceptor.admit(request) {
                Ok(admission) => admission,
                Err(rejection) => {
                    warn!("login of {} rejected: {:?}", name, rejection);
                    return reject(conn, rejection);
                }
            };
            let pid = admission.pid;
            let ack = Reply::with_body(
                Command::Login,
                login_ret::OK,
                ReplyBody::Login {
                    pid,
                    version: PROTOCOL_VERSION,
                },
            );
            if let Err(e) = conn.send_reply(&ack) {
                acceptor.abort(admission);
                conn.close();
                return Err(e.into());
            }
            conn.bind(pid);
            conn.set_read_timeout(None)?;
            info!("process {} logged in as pid {}", name, pid);
            acceptor.commit(admission, conn);
            Ok(())
        }
        _ => {
            warn!("connection from {} opened with command {}", conn.peer(), frame.command);
            conn.close();
            Err(CallError::UnexpectedCommand(frame.command))
        }
    }
}

fn reject(mut conn: Connection, rejection: LoginRejection) -> CallResult<()> {
    let reply = Reply::with_body(
        Command::Login,
        rejection.ret_code(),
        ReplyBody::Login {
            pid: Pid(-1),
            version: PROTOCOL_VERSION,
        },
    );
    let sent = conn.send_reply(&reply);
    conn.close();
    sent.map_err(CallError::from)
}

// ============================================================================
// Listener Thread
// ============================================================================

/// Something that yields fresh transports without blocking forever
trait Accept: Send + 'static {
    fn accept_one(&self) -> std::io::Result<Option<Box<dyn Transport>>>;
}

impl Accept for TcpListener {
    fn accept_one(&self) -> std::io::Result<Option<Box<dyn Transport>>> {
        match self.accept() {
            Ok((stream, _)) => Ok(Some(Box::new(TcpTransport::new(stream).map_err(
                |e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )?))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
impl Accept for std::os::unix::net::UnixListener {
    fn accept_one(&self) -> std::io::Result<Option<Box<dyn Transport>>> {
        match self.accept() {
            Ok((stream, _)) => Ok(Some(Box::new(
                super::transport::UnixTransport::new(stream).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
                })?,
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Accept thread handle
pub struct LoginListener {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    shutdown_initiated: bool,
}

impl LoginListener {
    pub fn spawn_tcp(
        addr: SocketAddr,
        acceptor: Arc<dyn LoginAcceptor>,
        trace_wire: bool,
    ) -> TransportResult<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|e| TransportError::Bind(format!("{}: {}", addr, e)))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr().ok();
        info!("login listener on tcp {:?}", local_addr);
        let mut this = Self::spawn(listener, acceptor, trace_wire, "login-tcp")?;
        this.local_addr = local_addr;
        Ok(this)
    }

    #[cfg(unix)]
    pub fn spawn_unix(
        path: &std::path::Path,
        acceptor: Arc<dyn LoginAcceptor>,
        trace_wire: bool,
    ) -> TransportResult<Self> {
        let _ = std::fs::remove_file(path);
        let listener = std::os::unix::net::UnixListener::bind(path)
            .map_err(|e| TransportError::Bind(format!("{}: {}", path.display(), e)))?;
        listener.set_nonblocking(true)?;
        info!("login listener on {}", path.display());
        Self::spawn(listener, acceptor, trace_wire, "login-unix")
    }

    fn spawn<L: Accept>(
        listener: L,
        acceptor: Arc<dyn LoginAcceptor>,
        trace_wire: bool,
        thread_name: &str,
    ) -> TransportResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || accept_loop(listener, acceptor, flag, trace_wire))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self {
            stop,
            handle: Some(handle),
            local_addr: None,
            shutdown_initiated: false,
        })
    }

    /// Bound TCP address (useful with port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting and join the thread
    pub fn shutdown(mut self) {
        self.shutdown_initiated = true;
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("login listener thread panicked");
            }
        }
    }
}

impl Drop for LoginListener {
    fn drop(&mut self) {
        if self.shutdown_initiated {
            return;
        }
        if self.handle.is_some() {
            warn!(
                "LoginListener dropped without calling shutdown() - stopping accept thread. \
                 Use `listener.shutdown()` for graceful cleanup."
            );
            self.stop_and_join();
        }
    }
}

fn accept_loop<L: Accept>(
    listener: L,
    acceptor: Arc<dyn LoginAcceptor>,
    stop: Arc<AtomicBool>,
    trace_wire: bool,
) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept_one() {
            Ok(Some(transport)) => {
                if let Err(e) = serve_connection(transport, acceptor.as_ref(), trace_wire) {
                    debug!(error = %e, "login connection ended with error");
                }
            }
            Ok(None) => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    info!("login listener stopped");
}
