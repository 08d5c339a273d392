/*!
 * TCP Transport
 */

use super::Transport;
use crate::core::errors::{TransportError, TransportResult};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Worker connection over a TCP socket
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> TransportResult<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(false)?;
        let peer = stream.peer_addr().ok();
        Ok(Self { stream, peer })
    }

    pub fn connect(addr: SocketAddr, timeout: Duration) -> TransportResult<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        Self::new(stream)
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> TransportResult<usize> {
        loop {
            match self.stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> TransportResult<()> {
        self.stream.set_read_timeout(timeout).map_err(TransportError::from)
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn peer(&self) -> String {
        match self.peer {
            Some(addr) => format!("tcp://{}", addr),
            None => String::from("tcp://?"),
        }
    }
}
