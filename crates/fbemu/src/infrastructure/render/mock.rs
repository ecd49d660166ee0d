//! Recording render target for unit and integration testing.
//!
//! Captures every presented frame and resize so tests can assert on what the
//! loops showed, and requests termination after a configurable number of
//! polls so loops end deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fbemu_core::screen::copy_visible;
use fbemu_core::ScreenGeometry;

use super::{RenderError, RenderTarget};

/// One presented frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    pub xres: u32,
    pub yres: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub pixels: Vec<u32>,
}

/// Everything a [`RecordingTarget`] observed.
#[derive(Default)]
pub struct TargetLog {
    frames: Mutex<Vec<RecordedFrame>>,
    resizes: Mutex<Vec<(u32, u32)>>,
    polls: AtomicUsize,
}

impl TargetLog {
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.frames.lock().expect("lock poisoned").clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().expect("lock poisoned").len()
    }

    pub fn resizes(&self) -> Vec<(u32, u32)> {
        self.resizes.lock().expect("lock poisoned").clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

/// A [`RenderTarget`] that records instead of drawing.
pub struct RecordingTarget {
    log: Arc<TargetLog>,
    terminate_after_polls: Option<usize>,
    fail_present: bool,
}

impl RecordingTarget {
    /// Never requests termination on its own.
    pub fn new() -> Self {
        Self {
            log: Arc::new(TargetLog::default()),
            terminate_after_polls: None,
            fail_present: false,
        }
    }

    /// Requests termination on the `polls`-th poll.
    pub fn terminating_after(polls: usize) -> Self {
        Self {
            terminate_after_polls: Some(polls),
            ..Self::new()
        }
    }

    /// Makes every `present` fail.
    pub fn failing_present(mut self) -> Self {
        self.fail_present = true;
        self
    }

    pub fn log(&self) -> Arc<TargetLog> {
        Arc::clone(&self.log)
    }
}

impl Default for RecordingTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTarget for RecordingTarget {
    fn present(&mut self, pixels: &[u32], geometry: &ScreenGeometry) -> Result<(), RenderError> {
        if self.fail_present {
            return Err(RenderError::Display("scripted present failure".to_string()));
        }
        let mut visible = vec![0; geometry.xres() as usize * geometry.yres() as usize];
        copy_visible(pixels, geometry, &mut visible);
        self.log.frames.lock().expect("lock poisoned").push(RecordedFrame {
            xres: geometry.xres(),
            yres: geometry.yres(),
            xoffset: geometry.xoffset(),
            yoffset: geometry.yoffset(),
            pixels: visible,
        });
        Ok(())
    }

    fn poll_termination_requested(&mut self) -> bool {
        let polls = self.log.polls.fetch_add(1, Ordering::SeqCst) + 1;
        self.terminate_after_polls == Some(polls)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.log
            .resizes
            .lock()
            .expect("lock poisoned")
            .push((width, height));
        Ok(())
    }
}
