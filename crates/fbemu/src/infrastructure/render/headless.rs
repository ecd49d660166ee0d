//! Headless render target.
//!
//! Keeps the last presented frame in memory.  When a snapshot path is set
//! the frame is written there as a binary PPM when the target is dropped,
//! which is handy for CI runs and remote machines without a display.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use fbemu_core::screen::copy_visible;
use fbemu_core::ScreenGeometry;

use super::{RenderError, RenderTarget};
use crate::infrastructure::signal;

pub struct HeadlessTarget {
    width: u32,
    height: u32,
    frame: Vec<u32>,
    frames: u64,
    snapshot: Option<PathBuf>,
}

impl HeadlessTarget {
    pub fn new(width: u32, height: u32, snapshot: Option<PathBuf>) -> Self {
        Self {
            width,
            height,
            frame: vec![0; width as usize * height as usize],
            frames: 0,
            snapshot,
        }
    }

    /// The last presented frame, `width × height` pixels.
    pub fn frame(&self) -> &[u32] {
        &self.frame
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Writes the last frame to `path` as a binary PPM.
    ///
    /// # Errors
    ///
    /// [`RenderError::Snapshot`] on any I/O failure.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), RenderError> {
        let to_err = |source| RenderError::Snapshot {
            path: path.to_path_buf(),
            source,
        };
        let mut out = BufWriter::new(File::create(path).map_err(to_err)?);
        write!(out, "P6\n{} {}\n255\n", self.width, self.height).map_err(to_err)?;
        for &pixel in &self.frame {
            // RGBA8888: red in the low byte
            let rgb = [pixel as u8, (pixel >> 8) as u8, (pixel >> 16) as u8];
            out.write_all(&rgb).map_err(to_err)?;
        }
        out.flush().map_err(to_err)
    }
}

impl RenderTarget for HeadlessTarget {
    fn present(&mut self, pixels: &[u32], geometry: &ScreenGeometry) -> Result<(), RenderError> {
        if geometry.xres() != self.width || geometry.yres() != self.height {
            self.resize(geometry.xres(), geometry.yres())?;
        }
        copy_visible(pixels, geometry, &mut self.frame);
        self.frames += 1;
        Ok(())
    }

    fn poll_termination_requested(&mut self) -> bool {
        signal::take_termination_request()
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == self.width && height == self.height {
            return Ok(());
        }
        tracing::debug!(width, height, "headless surface resized");
        self.width = width;
        self.height = height;
        self.frame = vec![0; width as usize * height as usize];
        Ok(())
    }
}

impl Drop for HeadlessTarget {
    fn drop(&mut self) {
        let Some(path) = self.snapshot.take() else {
            return;
        };
        if self.frames == 0 {
            return;
        }
        match self.write_snapshot(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "last frame written"),
            Err(e) => tracing::warn!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbemu_core::DisplayMode;
    use uuid::Uuid;

    fn geometry(xres: u32, yres: u32) -> ScreenGeometry {
        ScreenGeometry::new(
            "fb",
            &DisplayMode {
                xres,
                yres,
                ..Default::default()
            },
        )
        .expect("valid geometry")
    }

    #[test]
    fn test_present_copies_visible_window() {
        // Arrange
        let mut target = HeadlessTarget::new(2, 2, None);

        // Act
        target.present(&[1, 2, 3, 4], &geometry(2, 2)).unwrap();

        // Assert
        assert_eq!(target.frame(), &[1, 2, 3, 4]);
        assert_eq!(target.frames_presented(), 1);
    }

    #[test]
    fn test_present_follows_geometry_resolution() {
        let mut target = HeadlessTarget::new(2, 2, None);
        target.present(&[5; 6], &geometry(3, 2)).unwrap();
        assert_eq!(target.frame().len(), 6);
    }

    #[test]
    fn test_snapshot_is_written_as_ppm_on_drop() {
        // Arrange
        let path = std::env::temp_dir().join(format!("fbemu_{}.ppm", Uuid::new_v4()));
        let mut target = HeadlessTarget::new(1, 1, Some(path.clone()));
        target.present(&[0x00CC_BBAA], &geometry(1, 1)).unwrap();

        // Act
        drop(target);

        // Assert
        let bytes = std::fs::read(&path).expect("snapshot written");
        assert!(bytes.starts_with(b"P6\n1 1\n255\n"));
        assert_eq!(&bytes[bytes.len() - 3..], &[0xAA, 0xBB, 0xCC]);
        std::fs::remove_file(&path).ok();
    }
}
