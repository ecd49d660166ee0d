//! FramebufferControlService: the emulated device's command set.
//!
//! Owns the [`DisplayBuffer`] that backs the emulated `/dev/fb_emul` and
//! answers every framebuffer request the session decodes:
//!
//! | Command           | Code   | In / out bytes | Effect                    |
//! |-------------------|--------|----------------|---------------------------|
//! | GetFixedInfo      | 0x4602 | 0 / 80         | none                      |
//! | GetVariableInfo   | 0x4600 | 0 / 160        | none                      |
//! | SetVariableInfo   | 0x4601 | 160 / 0        | reallocates the buffer    |
//! | PanDisplay        | 0x4606 | 160 / 0        | none                      |
//! | probe in          | 23     | 4 / 0          | logs the value            |
//! | probe out         | 42     | 0 / 4          | answers 42                |
//! | anything else     | any    | 0 / 0          | none                      |
//!
//! # Buffer negotiation (for beginners)
//!
//! With unrestricted ioctls the kernel does not know how many bytes a
//! command reads or writes at `arg`.  The first request arrives with the
//! sizes the kernel guessed (usually 0 / 0).  If they differ from what the
//! command needs, the service answers with a *retry* that names the exact
//! regions at `arg`; the kernel copies them and sends the request again.
//! Only a request whose sizes match runs.
//!
//! ```text
//!   kernel ── ioctl(cmd, in 0, out 0) ──►  service
//!          ◄── retry(in: arg/160)  ──────
//!          ── ioctl(cmd, in 160, out 0) ─►
//!          ◄── ack ─────────────────────
//! ```

use fbemu_core::protocol::ioctl::PROBE_OUT_VALUE;
use fbemu_core::protocol::{FbCommand, IoctlContext, IoctlReply, IoctlRequest};
use fbemu_core::{
    BufferError, DisplayBuffer, DisplayMode, FailureKind, FixScreenInfo, GeometryError,
    ScreenGeometry, VarScreenInfo,
};
use thiserror::Error;

/// Errors building the initial device state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("invalid initial display mode: {0}")]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl ControlError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ControlError::Geometry(e) => e.kind(),
            ControlError::Buffer(e) => e.kind(),
        }
    }
}

/// State and command handling of the emulated framebuffer.
pub struct FramebufferControlService {
    buffer: DisplayBuffer,
    memory_limit: u64,
    resized: bool,
}

impl FramebufferControlService {
    /// Allocates the initial buffer for `mode`.
    ///
    /// # Errors
    ///
    /// [`ControlError`] if the mode is invalid or over `memory_limit`.
    pub fn new(id: &str, mode: &DisplayMode, memory_limit: u64) -> Result<Self, ControlError> {
        let geometry = ScreenGeometry::new(id, mode)?;
        let buffer = DisplayBuffer::allocate(geometry, memory_limit)?;
        Ok(Self {
            buffer,
            memory_limit,
            resized: false,
        })
    }

    pub fn buffer(&self) -> &DisplayBuffer {
        &self.buffer
    }

    pub fn geometry(&self) -> &ScreenGeometry {
        self.buffer.geometry()
    }

    /// `fb_fix_screeninfo` for the current buffer.
    pub fn fixed_info(&self) -> FixScreenInfo {
        let smem_len = u32::try_from(self.buffer.len_bytes()).unwrap_or(u32::MAX);
        self.geometry().to_fix(0, smem_len)
    }

    /// `fb_var_screeninfo` for the current buffer.
    pub fn variable_info(&self) -> VarScreenInfo {
        self.geometry().to_var()
    }

    /// Returns `true` once after a SetVariableInfo changed the resolution.
    pub fn take_resize(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    /// Device `read()`: up to `size` bytes from `offset`, clamped at the end.
    pub fn read(&self, offset: u64, size: u32) -> Vec<u8> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        self.buffer.read_bytes(offset, size as usize)
    }

    /// Device `write()`: stores `data` at `offset`, clamped at the end.
    /// Returns the number of bytes stored.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> u32 {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let stored = self.buffer.write_bytes(data, offset);
        u32::try_from(stored).unwrap_or(u32::MAX)
    }

    /// Answers one ioctl, negotiating buffer sizes first.
    pub fn handle_ioctl(&mut self, request: &IoctlRequest) -> IoctlReply {
        let context = IoctlContext::from_request(request);
        if let Some(retry) = context.retry() {
            tracing::debug!(
                cmd = format_args!("{:#x}", request.cmd),
                in_size = request.in_size,
                out_size = request.out_size,
                "ioctl retry"
            );
            return IoctlReply::Retry(retry);
        }

        match context.command() {
            FbCommand::GetFixedInfo => IoctlReply::data(self.fixed_info().to_bytes().to_vec()),
            FbCommand::GetVariableInfo => {
                IoctlReply::data(self.variable_info().to_bytes().to_vec())
            }
            FbCommand::SetVariableInfo => self.set_variable_info(&request.in_data),
            FbCommand::PanDisplay => {
                // The emulated device has no second observer to notify.
                tracing::trace!("pan display");
                IoctlReply::ack()
            }
            FbCommand::ProbeIn => match request.in_data.get(..4) {
                Some(bytes) => {
                    let value = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    tracing::info!(value, "probe value received");
                    IoctlReply::ack()
                }
                None => IoctlReply::invalid(),
            },
            FbCommand::ProbeOut => IoctlReply::data(PROBE_OUT_VALUE.to_ne_bytes().to_vec()),
            FbCommand::Unknown(cmd) => {
                tracing::debug!(cmd = format_args!("{cmd:#x}"), "unknown ioctl acknowledged");
                IoctlReply::ack()
            }
        }
    }

    fn set_variable_info(&mut self, payload: &[u8]) -> IoctlReply {
        let Ok(var) = VarScreenInfo::from_bytes(payload) else {
            return IoctlReply::invalid();
        };
        let geometry = match ScreenGeometry::from_var(self.geometry().id(), &var) {
            Ok(geometry) => geometry,
            Err(e) => {
                tracing::warn!("rejected variable info: {e}");
                return IoctlReply::invalid();
            }
        };
        // Built whole before it replaces the current buffer.
        let buffer = match DisplayBuffer::allocate(geometry, self.memory_limit) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!("rejected variable info: {e}");
                return IoctlReply::Error(fbemu_core::error::errno::ENOMEM);
            }
        };

        if buffer.geometry().resolution_differs(self.geometry()) {
            self.resized = true;
        }
        tracing::info!(
            xres = buffer.geometry().xres(),
            yres = buffer.geometry().yres(),
            xres_virtual = buffer.geometry().xres_virtual(),
            yres_virtual = buffer.geometry().yres_virtual(),
            "display mode set"
        );
        self.buffer = buffer;
        IoctlReply::ack()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
