//! FUSE/CUSE wire codec.
//!
//! Requests read from `/dev/cuse` start with a 40-byte `fuse_in_header`;
//! replies written back start with a 16-byte `fuse_out_header`.  All integers
//! are in native byte order because the peer is the local kernel.
//!
//! ```text
//! in:  [len:4][opcode:4][unique:8][nodeid:8][uid:4][gid:4][pid:4][extlen:2][pad:2][body]
//! out: [len:4][error:4][unique:8][body]
//! ```

use thiserror::Error;

use crate::error::FailureKind;
use crate::protocol::ioctl::IoVec;

/// Size of `struct fuse_in_header`.
pub const IN_HEADER_SIZE: usize = 40;
/// Size of `struct fuse_out_header`.
pub const OUT_HEADER_SIZE: usize = 16;

/// Protocol version answered to `CUSE_INIT`.  The kernel needs major 7.
pub const KERNEL_VERSION: u32 = 7;
pub const KERNEL_MINOR_VERSION: u32 = 31;
/// Lowest minor version the CUSE driver accepts.
pub const MIN_KERNEL_MINOR_VERSION: u32 = 11;

/// `CUSE_UNRESTRICTED_IOCTL`: the kernel forwards any ioctl and lets user
/// space describe the buffers through retries.
pub const CUSE_UNRESTRICTED_IOCTL: u32 = 1 << 0;

/// `FOPEN_DIRECT_IO`
pub const FOPEN_DIRECT_IO: u32 = 1 << 0;

/// `FUSE_IOCTL_UNRESTRICTED`
pub const FUSE_IOCTL_UNRESTRICTED: u32 = 1 << 1;
/// `FUSE_IOCTL_RETRY`
pub const FUSE_IOCTL_RETRY: u32 = 1 << 2;
/// Most iovecs a retry may name in each direction.
pub const FUSE_IOCTL_MAX_IOV: usize = 256;

/// FUSE opcodes the device handles.
pub mod opcode {
    pub const FORGET: u32 = 2;
    pub const OPEN: u32 = 14;
    pub const READ: u32 = 15;
    pub const WRITE: u32 = 16;
    pub const RELEASE: u32 = 18;
    pub const FSYNC: u32 = 20;
    pub const FLUSH: u32 = 25;
    pub const INTERRUPT: u32 = 36;
    pub const DESTROY: u32 = 38;
    pub const IOCTL: u32 = 39;
    pub const POLL: u32 = 40;
    pub const CUSE_INIT: u32 = 4096;
}

const CUSE_INIT_IN_SIZE: usize = 16;
const CUSE_INIT_OUT_SIZE: usize = 72;
const OPEN_IN_SIZE: usize = 8;
const READ_IN_SIZE: usize = 40;
const WRITE_IN_SIZE: usize = 40;
const IOCTL_IN_SIZE: usize = 32;

/// Errors produced while decoding a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("header length mismatch: header says {declared}, read {available}")]
    LengthMismatch { declared: usize, available: usize },

    #[error("unsupported kernel protocol {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },
}

impl WireError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Resource
    }
}

/// `struct fuse_in_header`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InHeader {
    pub len: u32,
    pub opcode: u32,
    pub unique: u64,
    pub nodeid: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// Body of an ioctl request after the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoctlRequest {
    pub fh: u64,
    pub flags: u32,
    pub cmd: u32,
    pub arg: u64,
    pub in_size: u32,
    pub out_size: u32,
    pub in_data: Vec<u8>,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CuseInit { major: u32, minor: u32, flags: u32 },
    Open { flags: u32 },
    Read { fh: u64, offset: u64, size: u32 },
    Write { fh: u64, offset: u64, data: Vec<u8> },
    Release,
    Flush,
    Fsync,
    Ioctl(IoctlRequest),
    Poll,
    Interrupt { target: u64 },
    Forget,
    Destroy,
    Unknown(u32),
}

impl Request {
    /// `false` for requests the kernel does not wait for an answer to.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Request::Interrupt { .. } | Request::Forget)
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize) -> Result<(), WireError> {
    if buf.len() < needed {
        return Err(WireError::InsufficientData {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, WireError> {
    require_len(buf, offset + 4)?;
    Ok(u32::from_ne_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, WireError> {
    require_len(buf, offset + 8)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    Ok(u64::from_ne_bytes(bytes))
}

/// Decodes the fixed header.
///
/// # Errors
///
/// [`WireError::InsufficientData`] for fewer than 40 bytes.
pub fn parse_header(buf: &[u8]) -> Result<InHeader, WireError> {
    require_len(buf, IN_HEADER_SIZE)?;
    Ok(InHeader {
        len: read_u32(buf, 0)?,
        opcode: read_u32(buf, 4)?,
        unique: read_u64(buf, 8)?,
        nodeid: read_u64(buf, 16)?,
        uid: read_u32(buf, 24)?,
        gid: read_u32(buf, 28)?,
        pid: read_u32(buf, 32)?,
    })
}

/// Decodes one complete request as read from the device.
///
/// # Errors
///
/// [`WireError`] if the buffer is shorter than the header claims or the body
/// is too short for its opcode.
pub fn parse_request(buf: &[u8]) -> Result<(InHeader, Request), WireError> {
    let header = parse_header(buf)?;
    let declared = header.len as usize;
    if declared < IN_HEADER_SIZE || declared > buf.len() {
        return Err(WireError::LengthMismatch {
            declared,
            available: buf.len(),
        });
    }
    let body = &buf[IN_HEADER_SIZE..declared];

    let request = match header.opcode {
        opcode::CUSE_INIT => {
            require_len(body, CUSE_INIT_IN_SIZE)?;
            Request::CuseInit {
                major: read_u32(body, 0)?,
                minor: read_u32(body, 4)?,
                flags: read_u32(body, 12)?,
            }
        }
        opcode::OPEN => {
            require_len(body, OPEN_IN_SIZE)?;
            Request::Open {
                flags: read_u32(body, 0)?,
            }
        }
        opcode::READ => {
            require_len(body, READ_IN_SIZE)?;
            Request::Read {
                fh: read_u64(body, 0)?,
                offset: read_u64(body, 8)?,
                size: read_u32(body, 16)?,
            }
        }
        opcode::WRITE => {
            require_len(body, WRITE_IN_SIZE)?;
            let size = read_u32(body, 16)? as usize;
            let data = &body[WRITE_IN_SIZE..];
            require_len(data, size)?;
            Request::Write {
                fh: read_u64(body, 0)?,
                offset: read_u64(body, 8)?,
                data: data[..size].to_vec(),
            }
        }
        opcode::IOCTL => {
            require_len(body, IOCTL_IN_SIZE)?;
            let in_size = read_u32(body, 24)?;
            let data = &body[IOCTL_IN_SIZE..];
            let take = (in_size as usize).min(data.len());
            Request::Ioctl(IoctlRequest {
                fh: read_u64(body, 0)?,
                flags: read_u32(body, 8)?,
                cmd: read_u32(body, 12)?,
                arg: read_u64(body, 16)?,
                in_size,
                out_size: read_u32(body, 28)?,
                in_data: data[..take].to_vec(),
            })
        }
        opcode::RELEASE => Request::Release,
        opcode::FLUSH => Request::Flush,
        opcode::FSYNC => Request::Fsync,
        opcode::POLL => Request::Poll,
        opcode::INTERRUPT => Request::Interrupt {
            target: read_u64(body, 0)?,
        },
        opcode::FORGET => Request::Forget,
        opcode::DESTROY => Request::Destroy,
        other => Request::Unknown(other),
    };
    Ok((header, request))
}

// ── Encoding ──────────────────────────────────────────────────────────────────

fn out_header(buf: &mut Vec<u8>, total: usize, error: i32, unique: u64) {
    buf.extend_from_slice(&(total as u32).to_ne_bytes());
    buf.extend_from_slice(&error.to_ne_bytes());
    buf.extend_from_slice(&unique.to_ne_bytes());
}

/// A reply carrying `payload` and no error.
pub fn encode_reply(unique: u64, payload: &[u8]) -> Vec<u8> {
    let total = OUT_HEADER_SIZE + payload.len();
    let mut buf = Vec::with_capacity(total);
    out_header(&mut buf, total, 0, unique);
    buf.extend_from_slice(payload);
    buf
}

/// A header-only reply reporting `errno` (positive; negated on the wire).
pub fn encode_error(unique: u64, errno: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(OUT_HEADER_SIZE);
    out_header(&mut buf, OUT_HEADER_SIZE, -errno, unique);
    buf
}

/// Parameters of the answer to `CUSE_INIT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuseInitReply {
    pub max_read: u32,
    pub max_write: u32,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub devname: String,
}

impl CuseInitReply {
    /// Encodes `cuse_init_out` followed by the `DEVNAME=` info string.
    pub fn encode(&self, unique: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(CUSE_INIT_OUT_SIZE + self.devname.len() + 9);
        for word in [
            KERNEL_VERSION,
            KERNEL_MINOR_VERSION,
            0,
            CUSE_UNRESTRICTED_IOCTL,
            self.max_read,
            self.max_write,
            self.dev_major,
            self.dev_minor,
        ] {
            body.extend_from_slice(&word.to_ne_bytes());
        }
        body.resize(CUSE_INIT_OUT_SIZE, 0);
        body.extend_from_slice(b"DEVNAME=");
        body.extend_from_slice(self.devname.as_bytes());
        body.push(0);
        encode_reply(unique, &body)
    }
}

/// Checks the kernel's `CUSE_INIT` version against what this codec speaks.
///
/// # Errors
///
/// [`WireError::UnsupportedVersion`] for a major other than 7 or a minor
/// below 11.
pub fn check_init_version(major: u32, minor: u32) -> Result<(), WireError> {
    if major != KERNEL_VERSION || minor < MIN_KERNEL_MINOR_VERSION {
        return Err(WireError::UnsupportedVersion { major, minor });
    }
    Ok(())
}

/// `fuse_open_out`
pub fn encode_open(unique: u64, fh: u64, open_flags: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&fh.to_ne_bytes());
    body.extend_from_slice(&open_flags.to_ne_bytes());
    body.extend_from_slice(&0u32.to_ne_bytes());
    encode_reply(unique, &body)
}

/// `fuse_write_out`
pub fn encode_write(unique: u64, size: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&size.to_ne_bytes());
    body.extend_from_slice(&0u32.to_ne_bytes());
    encode_reply(unique, &body)
}

/// `fuse_ioctl_out` for a completed ioctl, followed by its output data.
pub fn encode_ioctl(unique: u64, result: i32, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(16 + data.len());
    body.extend_from_slice(&result.to_ne_bytes());
    body.extend_from_slice(&0u32.to_ne_bytes());
    body.extend_from_slice(&0u32.to_ne_bytes());
    body.extend_from_slice(&0u32.to_ne_bytes());
    body.extend_from_slice(data);
    encode_reply(unique, &body)
}

/// `fuse_ioctl_out` asking the kernel to retry with the named buffers.
///
/// Input iovecs are written first, then output iovecs.
pub fn encode_ioctl_retry(unique: u64, input: &[IoVec], output: &[IoVec]) -> Vec<u8> {
    let mut body = Vec::with_capacity(16 + (input.len() + output.len()) * 16);
    body.extend_from_slice(&0i32.to_ne_bytes());
    body.extend_from_slice(&FUSE_IOCTL_RETRY.to_ne_bytes());
    body.extend_from_slice(&(input.len() as u32).to_ne_bytes());
    body.extend_from_slice(&(output.len() as u32).to_ne_bytes());
    for iov in input.iter().chain(output) {
        body.extend_from_slice(&iov.base.to_ne_bytes());
        body.extend_from_slice(&iov.len.to_ne_bytes());
    }
    encode_reply(unique, &body)
}

/// Encodes a request the way the kernel would.  Used by test doubles.
pub fn encode_request(unique: u64, opcode: u32, body: &[u8]) -> Vec<u8> {
    let total = IN_HEADER_SIZE + body.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as u32).to_ne_bytes());
    buf.extend_from_slice(&opcode.to_ne_bytes());
    buf.extend_from_slice(&unique.to_ne_bytes());
    buf.extend_from_slice(&0u64.to_ne_bytes());
    buf.resize(IN_HEADER_SIZE, 0);
    buf.extend_from_slice(body);
    buf
}

/// Body of an ioctl request as the kernel encodes it.  Used by test doubles.
pub fn encode_ioctl_body(cmd: u32, arg: u64, in_data: &[u8], out_size: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(IOCTL_IN_SIZE + in_data.len());
    body.extend_from_slice(&0u64.to_ne_bytes());
    body.extend_from_slice(&FUSE_IOCTL_UNRESTRICTED.to_ne_bytes());
    body.extend_from_slice(&cmd.to_ne_bytes());
    body.extend_from_slice(&arg.to_ne_bytes());
    body.extend_from_slice(&(in_data.len() as u32).to_ne_bytes());
    body.extend_from_slice(&out_size.to_ne_bytes());
    body.extend_from_slice(in_data);
    body
}

/// Decoded `fuse_out_header`, for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutHeader {
    pub len: u32,
    pub error: i32,
    pub unique: u64,
}

/// Decodes the header of a reply.
///
/// # Errors
///
/// [`WireError::InsufficientData`] for fewer than 16 bytes.
pub fn parse_out_header(buf: &[u8]) -> Result<OutHeader, WireError> {
    Ok(OutHeader {
        len: read_u32(buf, 0)?,
        error: read_u32(buf, 4)? as i32,
        unique: read_u64(buf, 8)?,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
