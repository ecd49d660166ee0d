//! Framebuffer ioctl command set and the two-phase buffer negotiation.
//!
//! With unrestricted ioctls the kernel cannot know how much memory a command
//! reads or writes, so the first request for a command usually arrives with
//! no buffers.  The device answers with a *retry* naming the user-space
//! regions it needs; the kernel copies them in and asks again.  Every command
//! follows one rule: if the supplied input and output sizes equal the
//! command's needs the request is executed, otherwise a retry naming exactly
//! those needs at the caller's `arg` address is returned.

use crate::error::errno;
use crate::protocol::fuse;
use crate::screen::info::{FIX_SCREENINFO_SIZE, VAR_SCREENINFO_SIZE};

/// `FBIOGET_VSCREENINFO`
pub const FBIOGET_VSCREENINFO: u32 = 0x4600;
/// `FBIOPUT_VSCREENINFO`
pub const FBIOPUT_VSCREENINFO: u32 = 0x4601;
/// `FBIOGET_FSCREENINFO`
pub const FBIOGET_FSCREENINFO: u32 = 0x4602;
/// `FBIOPAN_DISPLAY`
pub const FBIOPAN_DISPLAY: u32 = 0x4606;
/// Diagnostic command that sends one `int` to the device.
pub const PROBE_IN: u32 = 23;
/// Diagnostic command that reads one `int` from the device.
pub const PROBE_OUT: u32 = 42;
/// Value returned by [`PROBE_OUT`].
pub const PROBE_OUT_VALUE: i32 = 42;

const INT_SIZE: u32 = 4;

/// A decoded ioctl command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FbCommand {
    GetFixedInfo,
    GetVariableInfo,
    SetVariableInfo,
    PanDisplay,
    ProbeIn,
    ProbeOut,
    Unknown(u32),
}

/// Buffer sizes a command reads from and writes to user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferNeeds {
    pub input: u32,
    pub output: u32,
}

impl FbCommand {
    pub fn from_code(code: u32) -> Self {
        match code {
            FBIOGET_FSCREENINFO => FbCommand::GetFixedInfo,
            FBIOGET_VSCREENINFO => FbCommand::GetVariableInfo,
            FBIOPUT_VSCREENINFO => FbCommand::SetVariableInfo,
            FBIOPAN_DISPLAY => FbCommand::PanDisplay,
            PROBE_IN => FbCommand::ProbeIn,
            PROBE_OUT => FbCommand::ProbeOut,
            other => FbCommand::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            FbCommand::GetFixedInfo => FBIOGET_FSCREENINFO,
            FbCommand::GetVariableInfo => FBIOGET_VSCREENINFO,
            FbCommand::SetVariableInfo => FBIOPUT_VSCREENINFO,
            FbCommand::PanDisplay => FBIOPAN_DISPLAY,
            FbCommand::ProbeIn => PROBE_IN,
            FbCommand::ProbeOut => PROBE_OUT,
            FbCommand::Unknown(code) => code,
        }
    }

    pub fn needs(self) -> BufferNeeds {
        let (input, output) = match self {
            FbCommand::GetFixedInfo => (0, FIX_SCREENINFO_SIZE as u32),
            FbCommand::GetVariableInfo => (0, VAR_SCREENINFO_SIZE as u32),
            FbCommand::SetVariableInfo | FbCommand::PanDisplay => (VAR_SCREENINFO_SIZE as u32, 0),
            FbCommand::ProbeIn => (INT_SIZE, 0),
            FbCommand::ProbeOut => (0, INT_SIZE),
            FbCommand::Unknown(_) => (0, 0),
        };
        BufferNeeds { input, output }
    }
}

/// A user-space region named in a retry: `struct fuse_ioctl_iovec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    pub base: u64,
    pub len: u64,
}

/// Regions the kernel must supply before the command can run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetryRequest {
    pub input: Vec<IoVec>,
    pub output: Vec<IoVec>,
}

/// Where a request stands in the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Supplied sizes differ from the command's needs.
    Negotiating,
    /// Supplied sizes match; the command can run.
    Transfer,
}

/// Per-request negotiation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoctlContext {
    command: FbCommand,
    arg: u64,
    in_size: u32,
    out_size: u32,
}

impl IoctlContext {
    pub fn new(cmd: u32, arg: u64, in_size: u32, out_size: u32) -> Self {
        Self {
            command: FbCommand::from_code(cmd),
            arg,
            in_size,
            out_size,
        }
    }

    pub fn from_request(request: &fuse::IoctlRequest) -> Self {
        Self::new(request.cmd, request.arg, request.in_size, request.out_size)
    }

    pub fn command(&self) -> FbCommand {
        self.command
    }

    pub fn arg(&self) -> u64 {
        self.arg
    }

    pub fn in_size(&self) -> u32 {
        self.in_size
    }

    pub fn out_size(&self) -> u32 {
        self.out_size
    }

    pub fn phase(&self) -> Phase {
        let needs = self.command.needs();
        if self.in_size == needs.input && self.out_size == needs.output {
            Phase::Transfer
        } else {
            Phase::Negotiating
        }
    }

    /// The retry to send while negotiating, `None` once sizes match.
    pub fn retry(&self) -> Option<RetryRequest> {
        if self.phase() == Phase::Transfer {
            return None;
        }
        let needs = self.command.needs();
        let iov = |len: u32| IoVec {
            base: self.arg,
            len: u64::from(len),
        };
        Some(RetryRequest {
            input: (needs.input > 0).then(|| iov(needs.input)).into_iter().collect(),
            output: (needs.output > 0).then(|| iov(needs.output)).into_iter().collect(),
        })
    }
}

/// Outcome of handling one ioctl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoctlReply {
    Retry(RetryRequest),
    Done { result: i32, data: Vec<u8> },
    Error(i32),
}

impl IoctlReply {
    pub fn ack() -> Self {
        IoctlReply::Done {
            result: 0,
            data: Vec::new(),
        }
    }

    pub fn data(data: Vec<u8>) -> Self {
        IoctlReply::Done { result: 0, data }
    }

    pub fn invalid() -> Self {
        IoctlReply::Error(errno::EINVAL)
    }

    /// Encodes the reply for the request identified by `unique`.
    pub fn encode(&self, unique: u64) -> Vec<u8> {
        match self {
            IoctlReply::Retry(retry) => fuse::encode_ioctl_retry(unique, &retry.input, &retry.output),
            IoctlReply::Done { result, data } => fuse::encode_ioctl(unique, *result, data),
            IoctlReply::Error(errno) => fuse::encode_error(unique, *errno),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
