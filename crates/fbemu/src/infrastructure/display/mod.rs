//! Sources the viewer mirrors: pixel memory and pan notifications.
//!
//! Two pairs exist.  The kernel pair maps `/dev/fbN` and reads
//! `/dev/fb_view`; the loopback pair reads an in-process [`DisplayBuffer`]
//! and a [`ViewReader`] woken through an eventfd.  The viewer loop only sees
//! the two traits below.
//!
//! [`DisplayBuffer`]: fbemu_core::DisplayBuffer
//! [`ViewReader`]: fbemu_core::ViewReader

use std::os::fd::BorrowedFd;
use std::path::PathBuf;

use fbemu_core::{FailureKind, GeometryError, NotifyError, ScreenGeometry, VarScreenInfo};
use nix::errno::Errno;
use thiserror::Error;

use crate::infrastructure::render::RenderError;

pub mod fbdev;
pub mod loopback;
pub mod view_device;

pub use fbdev::MappedFramebuffer;
pub use loopback::{EventFdWakeup, LoopbackNotification, SharedFrame};
pub use view_device::ViewDevice;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{request} on {path} failed: {source}")]
    Ioctl {
        path: PathBuf,
        request: &'static str,
        #[source]
        source: Errno,
    },

    #[error("framebuffer {path} is not usable: {source}")]
    Geometry {
        path: PathBuf,
        #[source]
        source: GeometryError,
    },

    #[error("failed to map {len} bytes of {path}: {source}")]
    Map {
        path: PathBuf,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("short notification read: {read} of {expected} bytes")]
    ShortRead { read: usize, expected: usize },

    #[error("notification channel: {0}")]
    Notify(#[from] NotifyError),

    #[error("eventfd: {0}")]
    EventFd(#[source] Errno),
}

impl DisplayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DisplayError::Geometry { source, .. } => source.kind(),
            DisplayError::Notify(e) => e.kind(),
            _ => FailureKind::Resource,
        }
    }
}

/// Where pan notifications come from.
pub trait NotificationSource {
    /// Descriptor that is readable while a notification is pending.
    fn descriptor(&self) -> BorrowedFd<'_>;

    /// Takes the pending snapshot, `None` if nothing is pending.
    ///
    /// # Errors
    ///
    /// [`DisplayError`] if the channel fails or has closed.
    fn read_snapshot(&mut self) -> Result<Option<VarScreenInfo>, DisplayError>;
}

/// Pixel memory the viewer presents from.
pub trait FrameSource {
    /// Geometry at the time the source was opened.
    fn geometry(&self) -> ScreenGeometry;

    /// Lends the current pixels to `present`.
    ///
    /// # Errors
    ///
    /// Whatever `present` returns.
    fn with_pixels(
        &self,
        present: &mut dyn FnMut(&[u32]) -> Result<(), RenderError>,
    ) -> Result<(), RenderError>;
}
