/*!
 * Transport
 * Byte-stream interface over which external workers are reached
 */

mod tcp;
#[cfg(unix)]
mod unix;

pub use tcp::TcpTransport;
#[cfg(unix)]
pub use unix::UnixTransport;

use crate::core::errors::TransportResult;
use std::time::Duration;

/// Blocking byte stream to one external worker
///
/// Callers never know which concrete stream they hold.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` means the peer closed
    fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize>;

    fn write(&mut self, buf: &[u8]) -> TransportResult<usize>;

    /// Bound blocking reads; `None` waits forever
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> TransportResult<()> {
        let _ = timeout;
        Ok(())
    }

    /// Shut down both directions; further reads return 0
    fn close(&mut self);

    /// Human-readable peer description for logs
    fn peer(&self) -> String;
}

impl Transport for Box<dyn Transport> {
    fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> TransportResult<usize> {
        (**self).write(buf)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> TransportResult<()> {
        (**self).set_read_timeout(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn peer(&self) -> String {
        (**self).peer()
    }
}
