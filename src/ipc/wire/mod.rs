/*!
 * Wire Codec
 *
 * Every frame is `command: i32 | size: i32 | body`, little-endian, where
 * `size` counts the whole frame including the 8 header bytes. Acknowledge
 * frames repeat the request's command code and start their body with an
 * `i32` result code.
 *
 * Variable-length fields always carry an explicit length prefix that is
 * validated against a per-field maximum on decode; no length is ever
 * derived from the frame size.
 */

pub mod messages;

pub use messages::{
    LoginRequest, Phase, PhaseCall, Reply, ReplyBody, Request, SchedInfo,
};

use crate::core::errors::{TransportError, WireError, WireResult};
use crate::core::limits::{HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::ipc::transport::Transport;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Command {
    Login = 1,
    Logout = 2,
    Kill = 3,
    Ping = 6,
    CallReference = 101,
    CallInit = 102,
    CallCyclic = 103,
    CallTerminate = 104,
    DereferenceAll = 110,
    GetSchedInfo = 111,
    LoopOut = 120,
    AddVariable = 201,
    RemoveVariable = 202,
    GetLabelByAddress = 203,
    WriteToMsgFile = 204,
    WriteVariable = 205,
    ReadVariable = 206,
    GetRefLabelByVid = 207,
    AttachVariable = 208,
    ErrorPopup = 209,
    OpenVirtualNetwork = 210,
    CloseVirtualNetwork = 211,
    ReadMemory = 301,
    WriteMemory = 302,
    ReferenceVariable = 303,
    DereferenceVariable = 304,
    WriteSectionToExe = 305,
}

impl Command {
    pub fn from_code(code: i32) -> WireResult<Self> {
        Ok(match code {
            1 => Command::Login,
            2 => Command::Logout,
            3 => Command::Kill,
            6 => Command::Ping,
            101 => Command::CallReference,
            102 => Command::CallInit,
            103 => Command::CallCyclic,
            104 => Command::CallTerminate,
            110 => Command::DereferenceAll,
            111 => Command::GetSchedInfo,
            120 => Command::LoopOut,
            201 => Command::AddVariable,
            202 => Command::RemoveVariable,
            203 => Command::GetLabelByAddress,
            204 => Command::WriteToMsgFile,
            205 => Command::WriteVariable,
            206 => Command::ReadVariable,
            207 => Command::GetRefLabelByVid,
            208 => Command::AttachVariable,
            209 => Command::ErrorPopup,
            210 => Command::OpenVirtualNetwork,
            211 => Command::CloseVirtualNetwork,
            301 => Command::ReadMemory,
            302 => Command::WriteMemory,
            303 => Command::ReferenceVariable,
            304 => Command::DereferenceVariable,
            305 => Command::WriteSectionToExe,
            other => return Err(WireError::UnknownCommand(other)),
        })
    }

    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Result codes of the login acknowledge
pub mod login_ret {
    pub const OK: i32 = 0;
    pub const NO_FREE_PID: i32 = -101;
    pub const ALREADY_RUNNING: i32 = -102;
    pub const WRONG_VERSION: i32 = -103;
}

/// A raw frame: command code plus body (header stripped)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: i32,
    pub body: Bytes,
}

impl Frame {
    /// Total size on the wire
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// First `i32` of the body, if present
    pub fn peek_i32(&self) -> Option<i32> {
        self.body.get(..4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// ============================================================================
// Frame I/O
// ============================================================================

fn read_exact(transport: &mut dyn Transport, mut buf: &mut [u8]) -> WireResult<()> {
    while !buf.is_empty() {
        let n = transport.read(buf)?;
        if n == 0 {
            return Err(WireError::Transport(TransportError::Closed));
        }
        buf = &mut buf[n..];
    }
    Ok(())
}

/// Write a fully encoded frame
pub fn write_frame(transport: &mut dyn Transport, mut frame: &[u8]) -> WireResult<()> {
    while !frame.is_empty() {
        let n = transport.write(frame)?;
        if n == 0 {
            return Err(WireError::Transport(TransportError::Closed));
        }
        frame = &frame[n..];
    }
    Ok(())
}

/// Read one frame, reusing `buf` as scratch space
pub fn read_frame(transport: &mut dyn Transport, buf: &mut BytesMut) -> WireResult<Frame> {
    buf.clear();
    buf.resize(HEADER_SIZE, 0);
    read_exact(transport, &mut buf[..HEADER_SIZE])?;
    let mut header = &buf[..HEADER_SIZE];
    let command = header.get_i32_le();
    let size = header.get_i32_le();
    let size = usize::try_from(size).map_err(|_| WireError::InvalidSize(0))?;
    if !(HEADER_SIZE..=MAX_MESSAGE_SIZE).contains(&size) {
        return Err(WireError::InvalidSize(size));
    }
    buf.resize(size, 0);
    read_exact(transport, &mut buf[HEADER_SIZE..size])?;
    let mut whole = buf.split().freeze();
    whole.advance(HEADER_SIZE);
    Ok(Frame {
        command,
        body: whole,
    })
}

// ============================================================================
// Field Codec
// ============================================================================

/// Builds one frame into a reusable buffer
pub struct Encoder<'a> {
    out: &'a mut BytesMut,
    start: usize,
}

impl<'a> Encoder<'a> {
    pub fn begin(out: &'a mut BytesMut, command: i32) -> Self {
        let start = out.len();
        out.put_i32_le(command);
        out.put_i32_le(0);
        Self { out, start }
    }

    #[inline]
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.out.put_i32_le(v);
        self
    }

    #[inline]
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.out.put_u32_le(v);
        self
    }

    #[inline]
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.out.put_u64_le(v);
        self
    }

    #[inline]
    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.out.put_i64_le(v);
        self
    }

    #[inline]
    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.out.put_f64_le(v);
        self
    }

    /// `u16` length + UTF-8 bytes
    pub fn str(&mut self, v: &str) -> &mut Self {
        let len = v.len().min(u16::MAX as usize);
        self.out.put_u16_le(len as u16);
        self.out.put_slice(&v.as_bytes()[..len]);
        self
    }

    /// `u32` length + raw bytes
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.out.put_u32_le(v.len() as u32);
        self.out.put_slice(v);
        self
    }

    /// Fixed-size block, zero padded or truncated to `len`
    pub fn fixed(&mut self, v: &[u8], len: usize) -> &mut Self {
        let take = v.len().min(len);
        self.out.put_slice(&v[..take]);
        self.out.put_bytes(0, len - take);
        self
    }

    /// Patch the size field; returns the frame length
    pub fn finish(&mut self) -> usize {
        let size = self.out.len() - self.start;
        self.out[self.start + 4..self.start + 8].copy_from_slice(&(size as i32).to_le_bytes());
        size
    }
}

/// Checked reader over a frame body
pub struct Decoder {
    body: Bytes,
}

impl Decoder {
    pub fn new(body: Bytes) -> Self {
        Self { body }
    }

    fn need(&self, n: usize) -> WireResult<()> {
        if self.body.remaining() < n {
            Err(WireError::Truncated {
                need: n,
                have: self.body.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn i32(&mut self) -> WireResult<i32> {
        self.need(4)?;
        Ok(self.body.get_i32_le())
    }

    pub fn u32(&mut self) -> WireResult<u32> {
        self.need(4)?;
        Ok(self.body.get_u32_le())
    }

    pub fn u64(&mut self) -> WireResult<u64> {
        self.need(8)?;
        Ok(self.body.get_u64_le())
    }

    pub fn i64(&mut self) -> WireResult<i64> {
        self.need(8)?;
        Ok(self.body.get_i64_le())
    }

    pub fn f64(&mut self) -> WireResult<f64> {
        self.need(8)?;
        Ok(self.body.get_f64_le())
    }

    pub fn str(&mut self, field: &str, max: usize) -> WireResult<String> {
        self.need(2)?;
        let len = self.body.get_u16_le() as usize;
        if len > max {
            return Err(WireError::FieldTooLong {
                field: field.into(),
                len,
                max,
            });
        }
        self.need(len)?;
        let raw = self.body.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidString(field.into()))
    }

    pub fn bytes(&mut self, field: &str, max: usize) -> WireResult<Bytes> {
        let len = self.u32()? as usize;
        if len > max {
            return Err(WireError::FieldTooLong {
                field: field.into(),
                len,
                max,
            });
        }
        self.need(len)?;
        Ok(self.body.split_to(len))
    }

    pub fn fixed(&mut self, len: usize) -> WireResult<Bytes> {
        self.need(len)?;
        Ok(self.body.split_to(len))
    }

    /// Reject trailing garbage
    pub fn finish(self) -> WireResult<()> {
        match self.body.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::from_code(103).unwrap(), Command::CallCyclic);
        assert_eq!(Command::WriteSectionToExe.code(), 305);
        assert_eq!(Command::from_code(999), Err(WireError::UnknownCommand(999)));
    }

    #[test]
    fn test_encoder_patches_size() {
        let mut out = BytesMut::new();
        let size = Encoder::begin(&mut out, 6).i32(7).str("ab").finish();
        assert_eq!(size, 8 + 4 + 2 + 2);
        assert_eq!(&out[4..8], &(size as i32).to_le_bytes());
    }

    #[test]
    fn test_decoder_limits() {
        let mut out = BytesMut::new();
        Encoder::begin(&mut out, 1).str("abcdef").finish();
        let mut dec = Decoder::new(out.freeze().slice(8..));
        assert!(matches!(
            dec.str("name", 3),
            Err(WireError::FieldTooLong { len: 6, max: 3, .. })
        ));
    }

    #[test]
    fn test_decoder_truncated() {
        let mut dec = Decoder::new(Bytes::from_static(&[1, 2]));
        assert_eq!(dec.i32(), Err(WireError::Truncated { need: 4, have: 2 }));
    }
}
