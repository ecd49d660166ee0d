//! Request transport between the kernel and the emulated device.
//!
//! The session loop only needs three things from a transport: a descriptor to
//! wait on, a way to pull one request, and a way to push one reply.  The real
//! implementation talks to `/dev/cuse`; tests use [`mock::ScriptedChannel`].

use std::os::fd::BorrowedFd;

use fbemu_core::FailureKind;
use thiserror::Error;

pub mod cuse;
pub mod mock;

pub use cuse::CuseChannel;

/// Outcome of one receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A complete request.
    Request(Vec<u8>),
    /// Nothing to read right now (signal, spurious wake-up, aborted request).
    Interrupted,
    /// The peer has gone away; the session should end.
    Closed,
}

/// Errors produced by a transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to receive request: {0}")]
    Receive(#[source] std::io::Error),

    #[error("failed to send reply: {0}")]
    Send(#[source] std::io::Error),

    #[error("short reply write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

impl ChannelError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Resource
    }
}

/// A bidirectional request/reply channel with a pollable descriptor.
pub trait RequestChannel {
    /// Descriptor that becomes readable when a request is waiting.
    fn descriptor(&self) -> BorrowedFd<'_>;

    /// Pulls one request.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Receive`] for failures that are neither benign nor a
    /// closed peer.
    fn receive(&mut self) -> Result<Received, ChannelError>;

    /// Pushes one complete reply.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Send`] or [`ChannelError::ShortWrite`].
    fn send(&mut self, reply: &[u8]) -> Result<(), ChannelError>;

    /// Frees the receive buffer.  Called once during session teardown.
    fn release(&mut self) {}
}
