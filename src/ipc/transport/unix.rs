/*!
 * Unix Socket Transport
 * Local named byte-pipe for workers on the same machine
 */

use super::Transport;
use crate::core::errors::{TransportError, TransportResult};
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub struct UnixTransport {
    stream: UnixStream,
    path: Option<PathBuf>,
}

impl UnixTransport {
    pub fn new(stream: UnixStream) -> TransportResult<Self> {
        stream.set_nonblocking(false)?;
        let path = stream
            .peer_addr()
            .ok()
            .and_then(|a| a.as_pathname().map(Path::to_path_buf));
        Ok(Self { stream, path })
    }

    pub fn connect(path: &Path) -> TransportResult<Self> {
        let stream = UnixStream::connect(path)?;
        let mut transport = Self::new(stream)?;
        transport.path = Some(path.to_path_buf());
        Ok(transport)
    }
}

impl Transport for UnixTransport {
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
        match &self.path {
            Some(path) => format!("unix://{}", path.display()),
            None => String::from("unix://(unnamed)"),
        }
    }
}
