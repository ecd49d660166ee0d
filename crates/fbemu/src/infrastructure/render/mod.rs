//! Presentation backends.
//!
//! Every backend implements [`RenderTarget`].  The headless backend is always
//! available; the X11 window is compiled in with the `x11-window` feature.
//!
//! # Testability
//!
//! [`mock::RecordingTarget`] records every frame and can request termination
//! after a fixed number of polls, which is how loop tests end.

use std::path::PathBuf;

use fbemu_core::{FailureKind, ScreenGeometry};
use thiserror::Error;

use crate::infrastructure::storage::config::{RenderBackend, RenderConfig};

pub mod headless;
pub mod mock;
#[cfg(feature = "x11-window")]
pub mod x11;

pub use headless::HeadlessTarget;

/// Title of the presentation window.
pub const WINDOW_TITLE: &str = "Framebuffer Emulator";

/// Errors produced by a render target.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot open display: {0}")]
    Display(String),

    #[error("backend {0:?} is not compiled into this build")]
    Unavailable(RenderBackend),

    #[error("failed to write snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RenderError::Unavailable(_) => FailureKind::UnsupportedConfiguration,
            RenderError::Display(_) | RenderError::Snapshot { .. } => FailureKind::Resource,
        }
    }
}

/// A surface that shows the visible window of a framebuffer.
pub trait RenderTarget {
    /// Shows the visible window of `pixels` as described by `geometry`.
    ///
    /// The pixel at `(x, y)` comes from byte offset
    /// `(x + xoffset) * 4 + (y + yoffset) * line_length`; sources outside
    /// `pixels` are shown as 0.
    ///
    /// # Errors
    ///
    /// [`RenderError`] if the surface cannot be updated.
    fn present(&mut self, pixels: &[u32], geometry: &ScreenGeometry) -> Result<(), RenderError>;

    /// Drains pending input.  Returns `true` once per quit request observed
    /// since the previous call.
    fn poll_termination_requested(&mut self) -> bool;

    /// Adapts the surface to a new visible resolution.
    ///
    /// # Errors
    ///
    /// [`RenderError`] if the surface cannot be resized.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError>;
}

/// Opens the backend selected in `config`, sized `width × height`.
///
/// # Errors
///
/// [`RenderError::Unavailable`] for a backend not compiled in, or the
/// backend's own open error.
pub fn open_target(
    config: &RenderConfig,
    width: u32,
    height: u32,
) -> Result<Box<dyn RenderTarget>, RenderError> {
    match config.backend {
        RenderBackend::Headless => Ok(Box::new(HeadlessTarget::new(
            width,
            height,
            config.snapshot.clone(),
        ))),
        #[cfg(feature = "x11-window")]
        RenderBackend::X11 => Ok(Box::new(x11::X11Target::open(width, height)?)),
        #[cfg(not(feature = "x11-window"))]
        RenderBackend::X11 => Err(RenderError::Unavailable(RenderBackend::X11)),
    }
}
