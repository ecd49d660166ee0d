//! Pan notification channel.
//!
//! The kernel driver pairs its `pan_display` hook with a pollable
//! `/dev/fb_view` device: each pan sets a pending flag and stores the new
//! variable info, a read returns that snapshot and clears the flag.  This
//! module models both ends so they can run in-process and be tested apart:
//!
//! ```text
//!   PanDisplay::pan ──publish──► PendingSlot ◄──take── ViewReader::read
//!         │                                                  ▲
//!         └──────── Wakeup::wake (eventfd, condvar) ─────────┘
//! ```
//!
//! Pans that arrive before a read coalesce into a single record.

pub mod pan;
pub mod slot;
pub mod view;

use thiserror::Error;

use crate::error::{errno, FailureKind};

pub use pan::PanDisplay;
pub use slot::PendingSlot;
pub use view::ViewReader;

/// Readiness hook fired by [`PanDisplay`] after each published pan.
///
/// The in-process loopback implements it with an eventfd so the consumer can
/// sit in an epoll wait like it would on the real device.
pub trait Wakeup: Send + Sync {
    fn wake(&self);
}

/// Errors reported by the consumer side.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NotifyError {
    /// The caller's buffer cannot hold a full snapshot.
    #[error("read buffer of {available} bytes cannot hold a {needed} byte snapshot")]
    NoBuffers { needed: usize, available: usize },

    /// Nothing is pending on a non-blocking read.
    #[error("no pan notification pending")]
    WouldBlock,

    /// The channel was released.
    #[error("notification channel closed")]
    NoData,
}

impl NotifyError {
    pub fn kind(&self) -> FailureKind {
        match self {
            NotifyError::NoBuffers { .. } => FailureKind::InvalidArgument,
            NotifyError::WouldBlock | NotifyError::NoData => FailureKind::Resource,
        }
    }

    /// Errno the kernel device reports for this condition.
    pub fn errno(&self) -> i32 {
        match self {
            NotifyError::NoBuffers { .. } => errno::ENOBUFS,
            NotifyError::WouldBlock => errno::EAGAIN,
            NotifyError::NoData => errno::ENODATA,
        }
    }
}
