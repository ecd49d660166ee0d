//! Integration tests for the emulation session.
//!
//! These replay the request sequence a kernel sends to a CUSE device (init,
//! open, ioctl negotiation, read/write, release, destroy) through a scripted
//! channel and check the wire replies together with what reached the render
//! target.

use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fbemu::application::control_service::FramebufferControlService;
use fbemu::application::session::{Session, SessionOptions};
use fbemu::infrastructure::device_node::{DeviceNodeError, DeviceReadyHook, NodeSetup};
use fbemu::infrastructure::multiplexer::Multiplexer;
use fbemu::infrastructure::render::mock::RecordingTarget;
use fbemu::infrastructure::transport::mock::ScriptedChannel;
use fbemu::infrastructure::transport::Received;
use fbemu_core::protocol::fuse::{
    encode_ioctl_body, encode_request, opcode, parse_out_header, FUSE_IOCTL_RETRY,
};
use fbemu_core::protocol::ioctl::{FBIOGET_VSCREENINFO, FBIOPUT_VSCREENINFO, PROBE_OUT};
use fbemu_core::screen::info::VAR_SCREENINFO_SIZE;
use fbemu_core::{DisplayMode, VarScreenInfo, DEFAULT_MEMORY_LIMIT};

const REPLY_HEADER: usize = 16;
const IOCTL_OUT: usize = 16;

// ── Request builders ──────────────────────────────────────────────────────────

fn cuse_init(unique: u64) -> Received {
    let mut body = Vec::new();
    for word in [7u32, 31, 0, 0] {
        body.extend_from_slice(&word.to_ne_bytes());
    }
    Received::Request(encode_request(unique, opcode::CUSE_INIT, &body))
}

fn open(unique: u64) -> Received {
    Received::Request(encode_request(unique, opcode::OPEN, &[0; 8]))
}

fn ioctl(unique: u64, cmd: u32, in_data: &[u8], out_size: u32) -> Received {
    let body = encode_ioctl_body(cmd, 0x7000, in_data, out_size);
    Received::Request(encode_request(unique, opcode::IOCTL, &body))
}

/// `fuse_read_in` / `fuse_write_in` share their first three fields.
fn io_body(offset: u64, size: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(40);
    body.extend_from_slice(&0u64.to_ne_bytes());
    body.extend_from_slice(&offset.to_ne_bytes());
    body.extend_from_slice(&size.to_ne_bytes());
    body.resize(40, 0);
    body
}

fn write(unique: u64, offset: u64, data: &[u8]) -> Received {
    let mut body = io_body(offset, data.len() as u32);
    body.extend_from_slice(data);
    Received::Request(encode_request(unique, opcode::WRITE, &body))
}

fn read(unique: u64, offset: u64, size: u32) -> Received {
    Received::Request(encode_request(unique, opcode::READ, &io_body(offset, size)))
}

fn simple(unique: u64, op: u32) -> Received {
    Received::Request(encode_request(unique, op, &[]))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn small_service() -> FramebufferControlService {
    let mode = DisplayMode {
        xres: 4,
        yres: 2,
        ..Default::default()
    };
    FramebufferControlService::new("emul_fb", &mode, DEFAULT_MEMORY_LIMIT).expect("valid mode")
}

fn options() -> SessionOptions {
    SessionOptions {
        poll_timeout_ms: 1,
        devname: "fb_it".to_string(),
        ..SessionOptions::default()
    }
}

fn payload(reply: &[u8]) -> &[u8] {
    &reply[REPLY_HEADER..]
}

fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

struct CountingHook(Arc<AtomicUsize>);

impl DeviceReadyHook for CountingHook {
    fn on_first_request(&mut self) -> Result<(), DeviceNodeError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_client_conversation_from_init_to_destroy() {
    // Arrange
    let requested = VarScreenInfo {
        xres: 2,
        yres: 2,
        xres_virtual: 2,
        yres_virtual: 4,
        bits_per_pixel: 32,
        ..Default::default()
    };
    let pixels: Vec<u8> = [0xFF00_00FFu32; 4].iter().flat_map(|p| p.to_ne_bytes()).collect();
    let channel = ScriptedChannel::new(vec![
        cuse_init(1),
        open(2),
        ioctl(3, FBIOGET_VSCREENINFO, &[], VAR_SCREENINFO_SIZE as u32),
        ioctl(4, FBIOPUT_VSCREENINFO, &requested.to_bytes(), 0),
        write(5, 0, &pixels),
        read(6, 0, 16),
        simple(7, opcode::RELEASE),
        simple(8, opcode::DESTROY),
    ]);
    let channel_log = channel.log();
    let target = RecordingTarget::new();
    let target_log = target.log();
    let hook_calls = Arc::new(AtomicUsize::new(0));

    let session = Session::new(
        Box::new(channel),
        Multiplexer::new().expect("epoll"),
        small_service(),
        Box::new(target),
        Some(Box::new(CountingHook(Arc::clone(&hook_calls)))),
        options(),
    )
    .expect("single dispatch");

    // Act
    let summary = session.run().expect("destroy ends the session cleanly");

    // Assert: every request answered, in order, without errors
    let replies = channel_log.replies();
    assert_eq!(summary.requests_serviced, 8);
    assert_eq!(replies.len(), 8);
    for (index, reply) in replies.iter().enumerate() {
        let header = parse_out_header(reply).unwrap();
        assert_eq!(header.unique, index as u64 + 1);
        assert_eq!(header.error, 0, "reply {} carried an error", index + 1);
        assert_eq!(header.len as usize, reply.len());
    }

    // CUSE_INIT names the device
    assert!(replies[0].windows(12).any(|w| w == b"DEVNAME=fb_i"));

    // FBIOGET_VSCREENINFO returns the configured mode
    let var = VarScreenInfo::from_bytes(&payload(&replies[2])[IOCTL_OUT..]).unwrap();
    assert_eq!((var.xres, var.yres), (4, 2));

    // WRITE stored all 16 bytes and READ gives them back
    assert_eq!(word(payload(&replies[4]), 0), 16);
    assert_eq!(payload(&replies[5]), pixels.as_slice());

    // The target followed the mode change and shows the written pixels
    assert_eq!(target_log.resizes(), vec![(2, 2)]);
    let last = target_log.frames().pop().expect("at least one frame");
    assert_eq!((last.xres, last.yres), (2, 2));
    assert_eq!(last.pixels, vec![0xFF00_00FF; 4]);

    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(channel_log.release_count(), 1);
}

#[test]
fn test_ioctl_without_buffers_is_retried_at_the_argument_address() {
    // Arrange
    let channel = ScriptedChannel::new(vec![
        ioctl(1, FBIOGET_VSCREENINFO, &[], 0),
        simple(2, opcode::DESTROY),
    ]);
    let log = channel.log();
    let session = Session::new(
        Box::new(channel),
        Multiplexer::new().unwrap(),
        small_service(),
        Box::new(RecordingTarget::new()),
        None,
        options(),
    )
    .unwrap();

    // Act
    session.run().unwrap();

    // Assert: one output iovec of exactly the structure size at `arg`
    let reply = payload(&log.replies()[0]).to_vec();
    assert_eq!(word(&reply, 4), FUSE_IOCTL_RETRY);
    assert_eq!(word(&reply, 8), 0);
    assert_eq!(word(&reply, 12), 1);
    let base = u64::from_ne_bytes(reply[16..24].try_into().unwrap());
    let len = u64::from_ne_bytes(reply[24..32].try_into().unwrap());
    assert_eq!(base, 0x7000);
    assert_eq!(len, VAR_SCREENINFO_SIZE as u64);
}

#[test]
fn test_probe_out_returns_its_constant() {
    let channel = ScriptedChannel::new(vec![
        ioctl(1, PROBE_OUT, &[], 4),
        simple(2, opcode::DESTROY),
    ]);
    let log = channel.log();
    let session = Session::new(
        Box::new(channel),
        Multiplexer::new().unwrap(),
        small_service(),
        Box::new(RecordingTarget::new()),
        None,
        options(),
    )
    .unwrap();

    session.run().unwrap();

    let reply = payload(&log.replies()[0]).to_vec();
    assert_eq!(i32::from_ne_bytes(reply[0..4].try_into().unwrap()), 0);
    assert_eq!(
        i32::from_ne_bytes(reply[IOCTL_OUT..IOCTL_OUT + 4].try_into().unwrap()),
        42
    );
}

#[test]
fn test_node_setup_opens_permissions_after_init() {
    // Arrange: stand-in for the node the kernel creates
    let node = std::env::temp_dir().join(format!("fbemu-node-{}", uuid::Uuid::new_v4()));
    std::fs::write(&node, b"").unwrap();
    std::fs::set_permissions(&node, std::fs::Permissions::from_mode(0o600)).unwrap();
    let hook = NodeSetup::new(node.clone(), 0o666, None);

    let channel = ScriptedChannel::new(vec![cuse_init(1), simple(2, opcode::DESTROY)]);
    let session = Session::new(
        Box::new(channel),
        Multiplexer::new().unwrap(),
        small_service(),
        Box::new(RecordingTarget::new()),
        Some(Box::new(hook)),
        options(),
    )
    .unwrap();

    // Act
    session.run().unwrap();

    // Assert
    let mode = std::fs::metadata(&node).unwrap().permissions().mode() & 0o777;
    std::fs::remove_file(&node).unwrap();
    assert_eq!(mode, 0o666);
}

#[test]
fn test_rejected_mode_change_keeps_the_previous_geometry() {
    // Arrange: 8 bits per pixel is not supported
    let bad = VarScreenInfo {
        xres: 2,
        yres: 2,
        bits_per_pixel: 8,
        ..Default::default()
    };
    let channel = ScriptedChannel::new(vec![
        ioctl(1, FBIOPUT_VSCREENINFO, &bad.to_bytes(), 0),
        simple(2, opcode::DESTROY),
    ]);
    let log = channel.log();
    let target = RecordingTarget::new();
    let target_log = target.log();
    let session = Session::new(
        Box::new(channel),
        Multiplexer::new().unwrap(),
        small_service(),
        Box::new(target),
        None,
        options(),
    )
    .unwrap();

    // Act
    session.run().unwrap();

    // Assert
    let header = parse_out_header(&log.replies()[0]).unwrap();
    assert_eq!(header.error, -fbemu_core::error::errno::EINVAL);
    assert!(target_log.resizes().is_empty());
    assert!(target_log.frames().iter().all(|f| f.xres == 4 && f.yres == 2));
}
