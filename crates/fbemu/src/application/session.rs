//! Session: one run of the device-emulation service.
//!
//! A session owns everything the emulated device needs (transport,
//! multiplexer, control service, render target) and drives them from a
//! single loop:
//!
//! ```text
//!   register channel fd
//!   loop until exit requested
//!     wait ≤ poll timeout ─► receive ─► dispatch ─► send reply
//!     first serviced request? ─► device-ready hook (chmod, drop privileges)
//!     present buffer
//!     poll termination input
//!   teardown (exactly once): unregister fd, release channel, reset state
//! ```
//!
//! Request-level failures (bad sizes, rejected modes, malformed bodies) are
//! answered with an errno and the loop goes on.  Transport, multiplexer,
//! render and privilege failures end the session; teardown still runs.

use fbemu_core::error::errno;
use fbemu_core::protocol::fuse::{self, FOPEN_DIRECT_IO};
use fbemu_core::protocol::{CuseInitReply, Request, WireError};
use fbemu_core::FailureKind;
use thiserror::Error;
use uuid::Uuid;

use crate::application::control_service::FramebufferControlService;
use crate::infrastructure::device_node::{DeviceNodeError, DeviceReadyHook};
use crate::infrastructure::multiplexer::{Multiplexer, MultiplexerError};
use crate::infrastructure::render::{RenderError, RenderTarget};
use crate::infrastructure::storage::config::AppConfig;
use crate::infrastructure::storage::DispatchMode;
use crate::infrastructure::transport::cuse::MAX_TRANSFER;
use crate::infrastructure::transport::{ChannelError, Received, RequestChannel};

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("dispatch mode {0:?} is not supported; use \"single\"")]
    UnsupportedDispatch(DispatchMode),

    #[error(transparent)]
    Multiplexer(#[from] MultiplexerError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("CUSE handshake failed: {0}")]
    Handshake(#[from] WireError),

    #[error(transparent)]
    DeviceNode(#[from] DeviceNodeError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl SessionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::UnsupportedDispatch(_) => FailureKind::UnsupportedConfiguration,
            SessionError::Multiplexer(e) => e.kind(),
            SessionError::Channel(e) => e.kind(),
            SessionError::Handshake(e) => e.kind(),
            SessionError::DeviceNode(e) => e.kind(),
            SessionError::Render(e) => e.kind(),
        }
    }
}

/// Loop parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub poll_timeout_ms: u16,
    pub dispatch: DispatchMode,
    /// Name the kernel gives the device node.
    pub devname: String,
    pub max_read: u32,
    pub max_write: u32,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_timeout_ms: config.session.poll_timeout_ms,
            dispatch: config.session.dispatch,
            devname: config.device.name.clone(),
            max_read: MAX_TRANSFER,
            max_write: MAX_TRANSFER,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: Uuid,
    pub requests_serviced: u64,
    pub frames_presented: u64,
}

pub struct Session {
    id: Uuid,
    channel: Box<dyn RequestChannel>,
    multiplexer: Multiplexer,
    service: FramebufferControlService,
    target: Box<dyn RenderTarget>,
    ready_hook: Option<Box<dyn DeviceReadyHook>>,
    options: SessionOptions,
    exit_requested: bool,
    registered: bool,
    torn_down: bool,
    requests_serviced: u64,
    frames_presented: u64,
}

impl Session {
    /// # Errors
    ///
    /// [`SessionError::UnsupportedDispatch`] for any dispatch mode other than
    /// [`DispatchMode::Single`].
    pub fn new(
        channel: Box<dyn RequestChannel>,
        multiplexer: Multiplexer,
        service: FramebufferControlService,
        target: Box<dyn RenderTarget>,
        ready_hook: Option<Box<dyn DeviceReadyHook>>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        if options.dispatch != DispatchMode::Single {
            return Err(SessionError::UnsupportedDispatch(options.dispatch));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            channel,
            multiplexer,
            service,
            target,
            ready_hook,
            options,
            exit_requested: false,
            registered: false,
            torn_down: false,
            requests_serviced: 0,
            frames_presented: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Runs until termination is requested, the kernel destroys the device,
    /// the transport closes, or a session-level error occurs.
    ///
    /// # Errors
    ///
    /// The [`SessionError`] that ended the loop, after teardown.
    pub fn run(mut self) -> Result<SessionSummary, SessionError> {
        let result = self.run_loop();
        self.teardown();
        result.map(|()| self.summary())
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            requests_serviced: self.requests_serviced,
            frames_presented: self.frames_presented,
        }
    }

    fn run_loop(&mut self) -> Result<(), SessionError> {
        self.multiplexer.register(self.channel.descriptor())?;
        self.registered = true;
        tracing::info!(session = %self.id, device = %self.options.devname, "session started");

        while !self.exit_requested {
            let ready = self.multiplexer.wait(1, self.options.poll_timeout_ms)?;
            if !ready.is_empty() {
                match self.channel.receive()? {
                    Received::Interrupted => {}
                    Received::Closed => {
                        tracing::info!(session = %self.id, "transport closed");
                        break;
                    }
                    Received::Request(bytes) => self.dispatch(&bytes)?,
                }
            }

            if self.requests_serviced > 0 {
                if let Some(mut hook) = self.ready_hook.take() {
                    hook.on_first_request()?;
                }
            }

            self.present()?;

            if self.target.poll_termination_requested() {
                tracing::info!(session = %self.id, "termination requested");
                self.exit_requested = true;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let (header, request) = match fuse::parse_request(bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                match fuse::parse_header(bytes) {
                    Ok(header) => {
                        tracing::warn!(opcode = header.opcode, "malformed request: {e}");
                        self.channel.send(&fuse::encode_error(header.unique, errno::EIO))?;
                    }
                    Err(_) => tracing::warn!(len = bytes.len(), "dropping undecodable request: {e}"),
                }
                return Ok(());
            }
        };
        let unique = header.unique;
        tracing::trace!(opcode = header.opcode, unique, "request");

        let reply = match request {
            Request::CuseInit { major, minor, .. } => {
                fuse::check_init_version(major, minor)?;
                tracing::info!(major, minor, devname = %self.options.devname, "CUSE initialised");
                Some(
                    CuseInitReply {
                        max_read: self.options.max_read,
                        max_write: self.options.max_write,
                        dev_major: 0,
                        dev_minor: 0,
                        devname: self.options.devname.clone(),
                    }
                    .encode(unique),
                )
            }
            Request::Open { .. } => Some(fuse::encode_open(unique, 0, FOPEN_DIRECT_IO)),
            Request::Read { offset, size, .. } => {
                Some(fuse::encode_reply(unique, &self.service.read(offset, size)))
            }
            Request::Write { offset, data, .. } => {
                Some(fuse::encode_write(unique, self.service.write(offset, &data)))
            }
            Request::Release | Request::Flush | Request::Fsync => {
                Some(fuse::encode_reply(unique, &[]))
            }
            Request::Ioctl(ioctl) => Some(self.service.handle_ioctl(&ioctl).encode(unique)),
            Request::Interrupt { .. } | Request::Forget => None,
            Request::Destroy => {
                tracing::info!(session = %self.id, "device destroyed by the kernel");
                self.exit_requested = true;
                Some(fuse::encode_reply(unique, &[]))
            }
            Request::Poll | Request::Unknown(_) => Some(fuse::encode_error(unique, errno::ENOSYS)),
        };

        if let Some(reply) = reply {
            self.channel.send(&reply)?;
            self.requests_serviced += 1;
        }

        if self.service.take_resize() {
            let geometry = self.service.geometry();
            self.target.resize(geometry.xres(), geometry.yres())?;
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), SessionError> {
        let buffer = self.service.buffer();
        self.target.present(buffer.pixels(), buffer.geometry())?;
        self.frames_presented += 1;
        Ok(())
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.registered {
            if let Err(e) = self.multiplexer.unregister(self.channel.descriptor()) {
                tracing::warn!("{e}");
            }
            self.registered = false;
        }
        self.channel.release();
        self.exit_requested = false;
        self.ready_hook = None;

        tracing::info!(
            session = %self.id,
            requests = self.requests_serviced,
            frames = self.frames_presented,
            "session ended"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::render::mock::RecordingTarget;
    use crate::infrastructure::transport::mock::ScriptedChannel;
    use fbemu_core::protocol::fuse::{encode_request, opcode, parse_out_header};
    use fbemu_core::{DisplayMode, DEFAULT_MEMORY_LIMIT};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn service() -> FramebufferControlService {
        FramebufferControlService::new("emul_fb", &DisplayMode::default(), DEFAULT_MEMORY_LIMIT)
            .expect("default mode")
    }

    fn session(channel: ScriptedChannel, target: RecordingTarget) -> Session {
        Session::new(
            Box::new(channel),
            Multiplexer::new().expect("epoll"),
            service(),
            Box::new(target),
            None,
            SessionOptions {
                poll_timeout_ms: 1,
                ..SessionOptions::default()
            },
        )
        .expect("single dispatch")
    }

    struct CountingHook(Arc<AtomicUsize>);

    impl DeviceReadyHook for CountingHook {
        fn on_first_request(&mut self) -> Result<(), DeviceNodeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_dispatch_is_rejected() {
        let result = Session::new(
            Box::new(ScriptedChannel::new(Vec::new())),
            Multiplexer::new().unwrap(),
            service(),
            Box::new(RecordingTarget::new()),
            None,
            SessionOptions {
                dispatch: DispatchMode::Concurrent,
                ..SessionOptions::default()
            },
        );
        let err = match result {
            Err(e) => e,
            Ok(_) => panic!("concurrent dispatch must be rejected"),
        };
        assert_eq!(err.kind(), FailureKind::UnsupportedConfiguration);
    }

    #[test]
    fn test_termination_before_any_request_tears_down_once() {
        // Arrange
        let channel = ScriptedChannel::new(Vec::new());
        let log = channel.log();
        let target = RecordingTarget::terminating_after(1);
        let target_log = target.log();

        // Act
        let summary = session(channel, target).run().expect("clean exit");

        // Assert
        assert_eq!(summary.requests_serviced, 0);
        assert_eq!(summary.frames_presented, 1);
        assert_eq!(log.release_count(), 1);
        assert_eq!(target_log.poll_count(), 1);
    }

    #[test]
    fn test_unknown_opcode_is_answered_with_enosys() {
        // Arrange
        let channel = ScriptedChannel::new(vec![Received::Request(encode_request(7, 9999, &[]))]);
        let log = channel.log();

        // Act
        session(channel, RecordingTarget::terminating_after(1)).run().unwrap();

        // Assert
        let replies = log.replies();
        assert_eq!(replies.len(), 1);
        let header = parse_out_header(&replies[0]).unwrap();
        assert_eq!(header.unique, 7);
        assert_eq!(header.error, -errno::ENOSYS);
    }

    #[test]
    fn test_interrupt_gets_no_reply() {
        let channel = ScriptedChannel::new(vec![Received::Request(encode_request(
            3,
            opcode::INTERRUPT,
            &1u64.to_ne_bytes(),
        ))]);
        let log = channel.log();

        let summary = session(channel, RecordingTarget::terminating_after(1)).run().unwrap();

        assert!(log.replies().is_empty());
        assert_eq!(summary.requests_serviced, 0);
    }

    #[test]
    fn test_truncated_body_is_answered_with_eio() {
        // OPEN needs an 8-byte body.
        let channel =
            ScriptedChannel::new(vec![Received::Request(encode_request(5, opcode::OPEN, &[]))]);
        let log = channel.log();

        session(channel, RecordingTarget::terminating_after(1)).run().unwrap();

        let header = parse_out_header(&log.replies()[0]).unwrap();
        assert_eq!(header.error, -errno::EIO);
    }

    #[test]
    fn test_ready_hook_runs_once_after_first_serviced_request() {
        // Arrange
        let open = |unique| Received::Request(encode_request(unique, opcode::OPEN, &[0u8; 8]));
        let channel = ScriptedChannel::new(vec![open(1), open(2), open(3)]);
        let calls = Arc::new(AtomicUsize::new(0));
        let session = Session::new(
            Box::new(channel),
            Multiplexer::new().unwrap(),
            service(),
            Box::new(RecordingTarget::terminating_after(3)),
            Some(Box::new(CountingHook(Arc::clone(&calls)))),
            SessionOptions {
                poll_timeout_ms: 1,
                ..SessionOptions::default()
            },
        )
        .unwrap();

        // Act
        let summary = session.run().unwrap();

        // Assert
        assert_eq!(summary.requests_serviced, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroy_ends_the_loop_with_a_reply() {
        let channel = ScriptedChannel::new(vec![Received::Request(encode_request(
            9,
            opcode::DESTROY,
            &[],
        ))]);
        let log = channel.log();

        let summary = session(channel, RecordingTarget::new()).run().unwrap();

        assert_eq!(summary.requests_serviced, 1);
        assert_eq!(parse_out_header(&log.replies()[0]).unwrap().error, 0);
        assert_eq!(log.release_count(), 1);
    }

    #[test]
    fn test_closed_transport_ends_the_loop() {
        let channel = ScriptedChannel::new(vec![Received::Closed]);
        let log = channel.log();

        let summary = session(channel, RecordingTarget::new()).run().unwrap();

        assert_eq!(summary.requests_serviced, 0);
        assert_eq!(log.release_count(), 1);
    }

    #[test]
    fn test_send_failure_ends_session_after_teardown() {
        // Arrange
        let channel = ScriptedChannel::new(vec![Received::Request(encode_request(
            1,
            opcode::OPEN,
            &[0u8; 8],
        ))])
        .failing_sends();
        let log = channel.log();

        // Act
        let result = session(channel, RecordingTarget::new()).run();

        // Assert
        assert!(matches!(result, Err(SessionError::Channel(_))));
        assert_eq!(log.release_count(), 1);
    }

    #[test]
    fn test_dropping_an_unrun_session_releases_the_channel_once() {
        let channel = ScriptedChannel::new(Vec::new());
        let log = channel.log();

        drop(session(channel, RecordingTarget::new()));

        assert_eq!(log.release_count(), 1);
    }

    #[test]
    fn test_no_request_is_serviced_after_termination() {
        // Arrange: three opens queued, termination seen after the first round
        let open = |unique| Received::Request(encode_request(unique, opcode::OPEN, &[0; 8]));
        let channel = ScriptedChannel::new(vec![open(1), open(2), open(3)]);
        let log = channel.log();

        // Act
        let summary = session(channel, RecordingTarget::terminating_after(1))
            .run()
            .expect("clean exit");

        // Assert
        let replies = log.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(parse_out_header(&replies[0]).unwrap().unique, 1);
        assert_eq!(log.receive_count(), 1);
        assert_eq!(log.release_count(), 1);
        assert_eq!(summary.requests_serviced, 1);
    }
}
