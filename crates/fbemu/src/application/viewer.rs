//! Viewer: mirrors a framebuffer into a render target.
//!
//! Follows whatever the producer shows: each pan notification carries the
//! new variable info, which moves the visible window (double buffering) and
//! may change the resolution, in which case the target is resized first.
//!
//! The loop waits on the notification descriptor with the same bounded
//! timeout as the emulation session, so termination input is noticed within
//! one timeout even when the producer is idle.

use fbemu_core::{FailureKind, ScreenGeometry, VarScreenInfo};
use thiserror::Error;

use crate::infrastructure::display::{DisplayError, FrameSource, NotificationSource};
use crate::infrastructure::multiplexer::{Multiplexer, MultiplexerError};
use crate::infrastructure::render::{RenderError, RenderTarget};

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Multiplexer(#[from] MultiplexerError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl ViewerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ViewerError::Display(e) => e.kind(),
            ViewerError::Multiplexer(e) => e.kind(),
            ViewerError::Render(e) => e.kind(),
        }
    }
}

/// Counters of a finished viewer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewerSummary {
    pub notifications: u64,
    pub frames_presented: u64,
}

pub struct Viewer<F: FrameSource, N: NotificationSource> {
    frames: F,
    notifications: N,
    target: Box<dyn RenderTarget>,
    multiplexer: Multiplexer,
    geometry: ScreenGeometry,
    poll_timeout_ms: u16,
}

impl<F: FrameSource, N: NotificationSource> Viewer<F, N> {
    pub fn new(
        frames: F,
        notifications: N,
        target: Box<dyn RenderTarget>,
        multiplexer: Multiplexer,
        poll_timeout_ms: u16,
    ) -> Self {
        let geometry = frames.geometry();
        Self {
            frames,
            notifications,
            target,
            multiplexer,
            geometry,
            poll_timeout_ms,
        }
    }

    /// Geometry the next frame will be presented with.
    pub fn geometry(&self) -> &ScreenGeometry {
        &self.geometry
    }

    /// Runs until the target reports a termination request.
    ///
    /// # Errors
    ///
    /// The first [`ViewerError`] from the notification source, the
    /// multiplexer or the target.  A snapshot that does not fit the mapping
    /// is logged and skipped.
    pub fn run(&mut self) -> Result<ViewerSummary, ViewerError> {
        self.multiplexer.register(self.notifications.descriptor())?;
        let result = self.run_loop();
        if let Err(e) = self.multiplexer.unregister(self.notifications.descriptor()) {
            tracing::warn!("{e}");
        }
        result
    }

    fn run_loop(&mut self) -> Result<ViewerSummary, ViewerError> {
        let mut summary = ViewerSummary::default();
        self.target.resize(self.geometry.xres(), self.geometry.yres())?;

        loop {
            if self.target.poll_termination_requested() {
                tracing::info!("viewer termination requested");
                return Ok(summary);
            }

            let ready = self.multiplexer.wait(1, self.poll_timeout_ms)?;
            if !ready.is_empty() {
                if let Some(var) = self.notifications.read_snapshot()? {
                    summary.notifications += 1;
                    self.apply_snapshot(&var)?;
                }
            }

            let geometry = &self.geometry;
            let target = &mut self.target;
            self.frames
                .with_pixels(&mut |pixels| target.present(pixels, geometry))?;
            summary.frames_presented += 1;
        }
    }

    fn apply_snapshot(&mut self, var: &VarScreenInfo) -> Result<(), ViewerError> {
        let mut next = self.geometry.clone();
        if let Err(e) = next.apply_snapshot(var) {
            tracing::warn!("ignoring pan notification: {e}");
            return Ok(());
        }
        if next.resolution_differs(&self.geometry) {
            tracing::info!(xres = next.xres(), yres = next.yres(), "resolution changed");
            self.target.resize(next.xres(), next.yres())?;
        }
        tracing::trace!(xoffset = next.xoffset(), yoffset = next.yoffset(), "visible window moved");
        self.geometry = next;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::display::loopback::{self, SharedFrame};
    use crate::infrastructure::render::mock::RecordingTarget;
    use fbemu_core::{DisplayBuffer, DisplayMode};

    fn double_buffered() -> ScreenGeometry {
        ScreenGeometry::new(
            "loop",
            &DisplayMode {
                xres: 2,
                yres: 2,
                xres_virtual: 2,
                yres_virtual: 4,
                bits_per_pixel: 32,
            },
        )
        .expect("valid geometry")
    }

    fn paged_frame() -> SharedFrame {
        let mut buffer = DisplayBuffer::allocate(double_buffered(), u64::MAX).unwrap();
        // Page 0 is all 1s, page 1 all 2s.
        buffer.write(&[1, 1, 1, 1, 2, 2, 2, 2], 0);
        SharedFrame::new(buffer)
    }

    #[test]
    fn test_presents_first_page_until_a_pan_arrives() {
        // Arrange
        let (_pan, notifications) = loopback::channel(double_buffered()).unwrap();
        let target = RecordingTarget::terminating_after(3);
        let log = target.log();
        let mut viewer = Viewer::new(
            paged_frame(),
            notifications,
            Box::new(target),
            Multiplexer::new().unwrap(),
            1,
        );

        // Act
        let summary = viewer.run().unwrap();

        // Assert
        assert_eq!(summary.frames_presented, 2);
        assert_eq!(summary.notifications, 0);
        assert!(log.frames().iter().all(|f| f.pixels == vec![1, 1, 1, 1]));
    }

    #[test]
    fn test_pan_switches_the_presented_page() {
        // Arrange
        let (pan, notifications) = loopback::channel(double_buffered()).unwrap();
        let target = RecordingTarget::terminating_after(2);
        let log = target.log();
        let mut viewer = Viewer::new(
            paged_frame(),
            notifications,
            Box::new(target),
            Multiplexer::new().unwrap(),
            50,
        );
        pan.pan(0, 2).unwrap();

        // Act
        let summary = viewer.run().unwrap();

        // Assert
        assert_eq!(summary.notifications, 1);
        let frames = log.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].yoffset, 2);
        assert_eq!(frames[0].pixels, vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_initial_resize_matches_source_resolution() {
        let (_pan, notifications) = loopback::channel(double_buffered()).unwrap();
        let target = RecordingTarget::terminating_after(1);
        let log = target.log();
        let mut viewer = Viewer::new(
            paged_frame(),
            notifications,
            Box::new(target),
            Multiplexer::new().unwrap(),
            1,
        );

        viewer.run().unwrap();

        assert_eq!(log.resizes(), vec![(2, 2)]);
        assert_eq!(log.frame_count(), 0);
    }
}
