//! Loopback demo: a double-buffering producer mirrored by the viewer.
//!
//! Stands in for a GUI program drawing into `/dev/fbN` and the kernel
//! driver behind it, all in one process:
//!
//! ```text
//!   producer thread                         main thread
//!   ───────────────                         ───────────
//!   draw back page ─► PanDisplay::pan ─► eventfd ─► Viewer (epoll wait)
//!        │                  │                         │
//!        └── SharedFrame ◄──┴── PendingSlot ──────────┘
//! ```
//!
//! The buffer holds two pages (`yres_virtual = 2 × yres`).  Each step draws
//! the next animation frame into the hidden page and pans to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fbemu_core::{
    BufferError, DisplayBuffer, DisplayMode, FailureKind, GeometryError, PanDisplay,
    ScreenGeometry,
};
use thiserror::Error;

use crate::application::viewer::{Viewer, ViewerError, ViewerSummary};
use crate::infrastructure::display::loopback::{self, SharedFrame};
use crate::infrastructure::display::DisplayError;
use crate::infrastructure::multiplexer::{Multiplexer, MultiplexerError};
use crate::infrastructure::render::RenderTarget;

/// Delay between producer frames (~30 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("invalid demo mode: {0}")]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Multiplexer(#[from] MultiplexerError),

    #[error(transparent)]
    Viewer(#[from] ViewerError),

    #[error("failed to start producer thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("producer thread panicked")]
    ProducerPanicked,
}

impl DemoError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DemoError::Geometry(e) => e.kind(),
            DemoError::Buffer(e) => e.kind(),
            DemoError::Display(e) => e.kind(),
            DemoError::Multiplexer(e) => e.kind(),
            DemoError::Viewer(e) => e.kind(),
            DemoError::Spawn(_) | DemoError::ProducerPanicked => FailureKind::Resource,
        }
    }
}

/// What a demo run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoSummary {
    pub frames_produced: u64,
    pub viewer: ViewerSummary,
}

/// Double-buffered geometry for `mode`: two pages stacked vertically.
///
/// # Errors
///
/// [`GeometryError`] if `mode` is not a valid 32-bit mode.
pub fn demo_geometry(id: &str, mode: &DisplayMode) -> Result<ScreenGeometry, GeometryError> {
    let paged = DisplayMode {
        xres_virtual: mode.xres,
        yres_virtual: mode.yres.saturating_mul(2),
        ..mode.clone()
    };
    ScreenGeometry::new(id, &paged)
}

/// Draws animation frames into the hidden page and flips to it.
pub struct Producer {
    frame: SharedFrame,
    pan: PanDisplay,
    tick: u32,
}

impl Producer {
    pub fn new(frame: SharedFrame, pan: PanDisplay) -> Self {
        Self {
            frame,
            pan,
            tick: 0,
        }
    }

    /// Draws one frame and pans to it.
    ///
    /// # Errors
    ///
    /// [`GeometryError::PanOutOfRange`] if the buffer has fewer than two pages.
    pub fn step(&mut self) -> Result<(), GeometryError> {
        let geometry = self.pan.geometry();
        let yres = geometry.yres();
        let back = if geometry.yoffset() == 0 { yres } else { 0 };
        let tick = self.tick;

        self.frame.update(|buffer| draw_pattern(buffer, back, yres, tick));
        self.pan.pan(0, back)?;
        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }

    pub fn frames_produced(&self) -> u64 {
        u64::from(self.tick)
    }
}

/// Diagonal RGBA8888 gradient scrolling with `tick`.
fn draw_pattern(buffer: &mut DisplayBuffer, first_row: u32, rows: u32, tick: u32) {
    for y in 0..rows {
        let Some(row) = buffer.row_mut(first_row + y) else {
            return;
        };
        for (x, pixel) in row.iter_mut().enumerate() {
            let x = x as u32;
            let red = x.wrapping_add(tick) & 0xFF;
            let green = y.wrapping_add(tick.wrapping_mul(2)) & 0xFF;
            let blue = (x ^ y).wrapping_add(tick) & 0xFF;
            *pixel = 0xFF00_0000 | (blue << 16) | (green << 8) | red;
        }
    }
}

/// Runs the producer on its own thread and the viewer on this one until the
/// target requests termination.
///
/// # Errors
///
/// [`DemoError`] from setup, the viewer, or a producer panic.
pub fn run_demo(
    id: &str,
    mode: &DisplayMode,
    memory_limit: u64,
    target: Box<dyn RenderTarget>,
    poll_timeout_ms: u16,
    frame_interval: Duration,
) -> Result<DemoSummary, DemoError> {
    let geometry = demo_geometry(id, mode)?;
    let frame = SharedFrame::new(DisplayBuffer::allocate(geometry.clone(), memory_limit)?);
    let (pan, notifications) = loopback::channel(geometry)?;
    let mut producer = Producer::new(frame.clone(), pan);
    let multiplexer = Multiplexer::new()?;

    let stop = Arc::new(AtomicBool::new(false));
    let producer_stop = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name("fbemu-producer".to_string())
        .spawn(move || {
            while !producer_stop.load(Ordering::SeqCst) {
                if let Err(e) = producer.step() {
                    tracing::error!("producer stopped: {e}");
                    break;
                }
                thread::sleep(frame_interval);
            }
            producer.frames_produced()
        })
        .map_err(DemoError::Spawn)?;

    tracing::info!(xres = mode.xres, yres = mode.yres, "demo started");
    let mut viewer = Viewer::new(frame, notifications, target, multiplexer, poll_timeout_ms);
    let result = viewer.run();

    stop.store(true, Ordering::SeqCst);
    let frames_produced = handle.join().map_err(|_| DemoError::ProducerPanicked)?;
    let viewer = result?;
    tracing::info!(frames_produced, frames_presented = viewer.frames_presented, "demo finished");
    Ok(DemoSummary {
        frames_produced,
        viewer,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::display::NotificationSource;
    use crate::infrastructure::render::mock::RecordingTarget;

    fn small_mode() -> DisplayMode {
        DisplayMode {
            xres: 4,
            yres: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_demo_geometry_has_two_pages() {
        let geometry = demo_geometry("demo", &small_mode()).unwrap();
        assert_eq!(geometry.yres_virtual(), 6);
        assert_eq!(geometry.xres_virtual(), 4);
    }

    #[test]
    fn test_producer_alternates_pages_and_notifies() {
        // Arrange
        let geometry = demo_geometry("demo", &small_mode()).unwrap();
        let frame = SharedFrame::new(DisplayBuffer::allocate(geometry.clone(), u64::MAX).unwrap());
        let (pan, mut notifications) = loopback::channel(geometry).unwrap();
        let mut producer = Producer::new(frame.clone(), pan);

        // Act / Assert
        producer.step().unwrap();
        assert_eq!(notifications.read_snapshot().unwrap().map(|v| v.yoffset), Some(3));
        producer.step().unwrap();
        assert_eq!(notifications.read_snapshot().unwrap().map(|v| v.yoffset), Some(0));
        assert_eq!(producer.frames_produced(), 2);
    }

    #[test]
    fn test_producer_draws_only_the_hidden_page() {
        // Arrange
        let geometry = demo_geometry("demo", &small_mode()).unwrap();
        let frame = SharedFrame::new(DisplayBuffer::allocate(geometry.clone(), u64::MAX).unwrap());
        let (pan, _notifications) = loopback::channel(geometry).unwrap();
        let mut producer = Producer::new(frame.clone(), pan);

        // Act
        producer.step().unwrap();

        // Assert: page 0 untouched, page 1 opaque.
        frame.update(|buffer| {
            assert_eq!(buffer.pixel(0, 0), Some(0));
            assert_eq!(buffer.pixel(0, 3).map(|p| p >> 24), Some(0xFF));
        });
    }

    #[test]
    fn test_run_demo_stops_producer_when_viewer_ends() {
        // Arrange
        let target = RecordingTarget::terminating_after(5);
        let log = target.log();

        // Act
        let summary = run_demo(
            "demo",
            &small_mode(),
            u64::MAX,
            Box::new(target),
            5,
            Duration::from_millis(1),
        )
        .unwrap();

        // Assert
        assert_eq!(summary.viewer.frames_presented, 4);
        assert_eq!(log.frame_count(), 4);
        assert!(log.frames().iter().all(|f| f.xres == 4 && f.yres == 3));
    }
}
