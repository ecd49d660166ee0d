//! Readiness multiplexer over `epoll`.
//!
//! The session and viewer loops block here with a bounded timeout so that
//! rendering and input polling keep running when no request arrives.

use std::collections::HashSet;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};

use fbemu_core::FailureKind;
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use thiserror::Error;

/// Errors produced by the multiplexer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultiplexerError {
    #[error("failed to create epoll instance: {0}")]
    Create(Errno),

    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),

    #[error("descriptor {0} is not registered")]
    NotRegistered(RawFd),

    #[error("failed to register descriptor {fd}: {source}")]
    Register { fd: RawFd, source: Errno },

    #[error("failed to unregister descriptor {fd}: {source}")]
    Unregister { fd: RawFd, source: Errno },

    #[error("epoll wait failed: {0}")]
    Wait(Errno),
}

impl MultiplexerError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Resource
    }
}

/// Wraps one epoll instance and the set of descriptors registered on it.
pub struct Multiplexer {
    epoll: Epoll,
    registered: HashSet<RawFd>,
}

impl Multiplexer {
    /// # Errors
    ///
    /// [`MultiplexerError::Create`] if the kernel refuses an epoll instance.
    pub fn new() -> Result<Self, MultiplexerError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(MultiplexerError::Create)?;
        Ok(Self {
            epoll,
            registered: HashSet::new(),
        })
    }

    /// Watches `fd` for readability.
    ///
    /// # Errors
    ///
    /// [`MultiplexerError::AlreadyRegistered`] for a descriptor registered
    /// twice, [`MultiplexerError::Register`] if the kernel rejects it.
    pub fn register(&mut self, fd: BorrowedFd<'_>) -> Result<(), MultiplexerError> {
        let raw = fd.as_raw_fd();
        if self.registered.contains(&raw) {
            return Err(MultiplexerError::AlreadyRegistered(raw));
        }
        let event = EpollEvent::new(EpollFlags::EPOLLIN, raw as u64);
        self.epoll
            .add(fd, event)
            .map_err(|source| MultiplexerError::Register { fd: raw, source })?;
        self.registered.insert(raw);
        tracing::debug!(fd = raw, "descriptor registered");
        Ok(())
    }

    /// Stops watching `fd`.
    ///
    /// # Errors
    ///
    /// [`MultiplexerError::NotRegistered`] if `fd` was never registered,
    /// [`MultiplexerError::Unregister`] if the kernel rejects the removal.
    pub fn unregister(&mut self, fd: BorrowedFd<'_>) -> Result<(), MultiplexerError> {
        let raw = fd.as_raw_fd();
        if !self.registered.remove(&raw) {
            return Err(MultiplexerError::NotRegistered(raw));
        }
        self.epoll
            .delete(fd)
            .map_err(|source| MultiplexerError::Unregister { fd: raw, source })?;
        tracing::debug!(fd = raw, "descriptor unregistered");
        Ok(())
    }

    pub fn is_registered(&self, fd: BorrowedFd<'_>) -> bool {
        self.registered.contains(&fd.as_raw_fd())
    }

    /// Blocks up to `timeout_ms` and returns the descriptors that became ready.
    ///
    /// An empty list means the timeout expired or the wait was interrupted by
    /// a signal; both are retried by the caller on its next iteration.
    ///
    /// # Errors
    ///
    /// [`MultiplexerError::Wait`] for any failure other than `EINTR`.
    pub fn wait(&self, max_events: usize, timeout_ms: u16) -> Result<Vec<RawFd>, MultiplexerError> {
        let mut events = vec![EpollEvent::empty(); max_events.max(1)];
        match self.epoll.wait(&mut events, timeout_ms) {
            Ok(n) => Ok(events[..n].iter().map(|e| e.data() as RawFd).collect()),
            Err(Errno::EINTR) => Ok(Vec::new()),
            Err(e) => Err(MultiplexerError::Wait(e)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
