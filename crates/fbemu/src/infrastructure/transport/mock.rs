//! Scripted request channel for unit and integration testing.
//!
//! Feeds a fixed sequence of [`Received`] items to the session and records
//! every reply, without a kernel or `/dev/cuse`.  Readiness is signalled
//! through a semaphore eventfd holding one count per scripted item, so the
//! session's epoll wait behaves as it would on the real device.

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nix::sys::eventfd::{EfdFlags, EventFd};

use super::{ChannelError, Received, RequestChannel};

/// Replies and teardown calls observed by a [`ScriptedChannel`].
#[derive(Default)]
pub struct ChannelLog {
    replies: Mutex<Vec<Vec<u8>>>,
    releases: AtomicUsize,
    receives: AtomicUsize,
}

impl ChannelLog {
    pub fn replies(&self) -> Vec<Vec<u8>> {
        self.replies.lock().expect("lock poisoned").clone()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn receive_count(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }
}

/// A [`RequestChannel`] that replays a script.
pub struct ScriptedChannel {
    script: VecDeque<Received>,
    ready: EventFd,
    log: Arc<ChannelLog>,
    fail_sends: bool,
}

impl ScriptedChannel {
    /// Creates a channel that will deliver `script` in order.
    ///
    /// Panics if the eventfd cannot be created.
    pub fn new(script: Vec<Received>) -> Self {
        let ready = EventFd::from_value_and_flags(
            script.len() as u32,
            EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_SEMAPHORE,
        )
        .expect("eventfd");
        Self {
            script: script.into(),
            ready,
            log: Arc::new(ChannelLog::default()),
            fail_sends: false,
        }
    }

    /// Makes every `send` fail with an I/O error.
    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Shared view of the recorded traffic, usable after the channel is moved.
    pub fn log(&self) -> Arc<ChannelLog> {
        Arc::clone(&self.log)
    }
}

impl RequestChannel for ScriptedChannel {
    fn descriptor(&self) -> BorrowedFd<'_> {
        self.ready.as_fd()
    }

    fn receive(&mut self) -> Result<Received, ChannelError> {
        self.log.receives.fetch_add(1, Ordering::SeqCst);
        match self.ready.read() {
            Ok(_) => {}
            Err(nix::errno::Errno::EAGAIN) => return Ok(Received::Interrupted),
            Err(e) => return Err(ChannelError::Receive(io::Error::from(e))),
        }
        Ok(self.script.pop_front().unwrap_or(Received::Closed))
    }

    fn send(&mut self, reply: &[u8]) -> Result<(), ChannelError> {
        if self.fail_sends {
            return Err(ChannelError::Send(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted send failure",
            )));
        }
        self.log
            .replies
            .lock()
            .expect("lock poisoned")
            .push(reply.to_vec());
        Ok(())
    }

    fn release(&mut self) {
        self.log.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_channel_replays_items_in_order() {
        // Arrange
        let mut channel = ScriptedChannel::new(vec![
            Received::Request(vec![1]),
            Received::Interrupted,
            Received::Closed,
        ]);

        // Act / Assert
        assert_eq!(channel.receive().unwrap(), Received::Request(vec![1]));
        assert_eq!(channel.receive().unwrap(), Received::Interrupted);
        assert_eq!(channel.receive().unwrap(), Received::Closed);
        // Script exhausted: nothing signalled any more
        assert_eq!(channel.receive().unwrap(), Received::Interrupted);
    }

    #[test]
    fn test_scripted_channel_records_replies() {
        let mut channel = ScriptedChannel::new(Vec::new());
        let log = channel.log();

        channel.send(&[1, 2, 3]).unwrap();
        channel.release();

        assert_eq!(log.replies(), vec![vec![1, 2, 3]]);
        assert_eq!(log.release_count(), 1);
    }

    #[test]
    fn test_failing_sends_report_send_error() {
        let mut channel = ScriptedChannel::new(Vec::new()).failing_sends();
        assert!(matches!(channel.send(&[0]), Err(ChannelError::Send(_))));
    }
}
