//! Failure taxonomy shared by every error type in the workspace.
//!
//! Each module defines its own `thiserror` enum; [`FailureKind`] is the common
//! classification used to decide whether a failure is answered on the wire,
//! aborts a session, or stops the process.

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Descriptor, registration, device or mapping failure.
    Resource,
    /// Rejected geometry or pan request.  State is unchanged.
    InvalidArgument,
    /// Buffer allocation above the configured ceiling.
    OutOfMemory,
    /// Privilege transition failure.
    Permission,
    /// Colour depth other than 32 bits per pixel.
    UnsupportedConfiguration,
}

impl FailureKind {
    /// Returns `true` if a failure of this kind must end the session.
    ///
    /// Only `InvalidArgument` is recoverable: it is reported to the requester
    /// and the session keeps running.
    pub fn is_fatal(self) -> bool {
        !matches!(self, FailureKind::InvalidArgument)
    }
}

/// Linux errno values used in protocol replies.
///
/// The core crate stays free of `libc`; these match `asm-generic/errno*.h`.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
    pub const ENODATA: i32 = 61;
    pub const ENOBUFS: i32 = 105;
}
