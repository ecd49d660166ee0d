//! # fbemu-core
//!
//! Shared library for the framebuffer emulator containing the screen-info
//! structures, display buffers, the pan notification model, and the CUSE
//! ioctl protocol.
//!
//! This crate has zero dependencies on OS APIs, windowing systems, or device
//! files.  Everything that touches `/dev` lives in the `fbemu` crate.
//!
//! # Architecture overview
//!
//! A GUI toolkit written for an embedded Linux framebuffer expects to open
//! `/dev/fbN`, query its geometry with `FBIOGET_*` ioctls, write pixels, and
//! pan between pages for double buffering.  The emulator gives such a program
//! that device on a desktop and shows the pixels in a window.
//!
//! - **`screen`** – the `fb_fix_screeninfo` / `fb_var_screeninfo` mirrors, the
//!   validated [`ScreenGeometry`], and the visible-window blit.
//!
//! - **`buffer`** – [`DisplayBuffer`]: pixel memory sized from a geometry, with
//!   clamped writes.
//!
//! - **`notify`** – the pan notification channel: a pending flag plus the latest
//!   geometry snapshot, guarded by one lock and a wakeable wait.
//!
//! - **`protocol`** – the FUSE/CUSE wire codec and the framebuffer ioctl command
//!   set with its two-phase buffer negotiation.
//!
//! - **`error`** – the failure taxonomy shared by every error type.

pub mod buffer;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod screen;

pub use buffer::{BufferError, DisplayBuffer, DEFAULT_MEMORY_LIMIT};
pub use error::FailureKind;
pub use notify::{NotifyError, PanDisplay, PendingSlot, ViewReader, Wakeup};
pub use screen::geometry::{DisplayMode, GeometryError, ScreenGeometry};
pub use screen::info::{FixScreenInfo, VarScreenInfo};
