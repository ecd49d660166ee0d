//! Heap-allocated pixel memory for the emulated device.
//!
//! A [`DisplayBuffer`] is created whole from a [`ScreenGeometry`] and never
//! resized in place: a resolution change builds a new buffer and swaps it in.
//! All writes are clamped to the buffer; an offset past the end stores
//! nothing and is not an error.

use thiserror::Error;

use crate::error::FailureKind;
use crate::screen::geometry::{ScreenGeometry, BYTES_PER_PIXEL};

/// Ceiling on pixel memory, matching the kernel driver's video memory size.
pub const DEFAULT_MEMORY_LIMIT: u64 = 16 * 1024 * 1024;

/// Errors produced by [`DisplayBuffer::allocate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("display buffer of {requested} bytes exceeds the {limit} byte limit")]
    OutOfMemory { requested: u64, limit: u64 },
}

impl BufferError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::OutOfMemory
    }
}

/// Pixel memory plus the geometry that describes it.
#[derive(Debug, Clone)]
pub struct DisplayBuffer {
    pixels: Vec<u32>,
    geometry: ScreenGeometry,
}

impl DisplayBuffer {
    /// Allocates zeroed memory of `line_length × yres_virtual` bytes.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfMemory`] if that exceeds `limit`.
    pub fn allocate(geometry: ScreenGeometry, limit: u64) -> Result<Self, BufferError> {
        let requested = geometry.buffer_len_bytes();
        if requested > limit {
            return Err(BufferError::OutOfMemory { requested, limit });
        }
        let capacity = usize::try_from(geometry.pixel_capacity())
            .map_err(|_| BufferError::OutOfMemory { requested, limit })?;
        tracing::debug!(
            xres = geometry.xres(),
            yres = geometry.yres(),
            xres_virtual = geometry.xres_virtual(),
            yres_virtual = geometry.yres_virtual(),
            bytes = requested,
            "display buffer allocated"
        );
        Ok(Self {
            pixels: vec![0; capacity],
            geometry,
        })
    }

    pub fn geometry(&self) -> &ScreenGeometry {
        &self.geometry
    }

    /// Mutable access for panning.  Resolution changes go through a new buffer.
    pub fn geometry_mut(&mut self) -> &mut ScreenGeometry {
        &mut self.geometry
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Capacity in pixels.
    pub fn capacity(&self) -> usize {
        self.pixels.len()
    }

    /// Capacity in bytes.
    pub fn len_bytes(&self) -> usize {
        self.pixels.len() * BYTES_PER_PIXEL
    }

    /// Copies as many of `data` as fit starting at `pixel_offset`.
    ///
    /// Returns `min(data.len(), capacity - pixel_offset)`, or 0 when the
    /// offset is at or past the end.
    pub fn write(&mut self, data: &[u32], pixel_offset: usize) -> usize {
        let Some(dest) = self.pixels.get_mut(pixel_offset..) else {
            return 0;
        };
        let count = data.len().min(dest.len());
        dest[..count].copy_from_slice(&data[..count]);
        count
    }

    /// Pixel memory viewed as bytes in native order.
    fn bytes(&self) -> &[u8] {
        // SAFETY: `u32` has no padding and `u8` has alignment 1, so the pixel
        // storage is a valid `[u8]` of four times its length.
        unsafe {
            std::slice::from_raw_parts(self.pixels.as_ptr().cast::<u8>(), self.len_bytes())
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len_bytes();
        // SAFETY: as in `bytes`; every byte pattern is a valid `u32`.
        unsafe { std::slice::from_raw_parts_mut(self.pixels.as_mut_ptr().cast::<u8>(), len) }
    }

    /// Byte-granular clamped write in native pixel byte order.
    pub fn write_bytes(&mut self, data: &[u8], byte_offset: usize) -> usize {
        let Some(dest) = self.bytes_mut().get_mut(byte_offset..) else {
            return 0;
        };
        let count = data.len().min(dest.len());
        dest[..count].copy_from_slice(&data[..count]);
        count
    }

    /// Byte-granular clamped read in native pixel byte order.
    pub fn read_bytes(&self, byte_offset: usize, len: usize) -> Vec<u8> {
        let Some(source) = self.bytes().get(byte_offset..) else {
            return Vec::new();
        };
        source[..len.min(source.len())].to_vec()
    }

    /// Pixel at virtual coordinates, `None` outside the virtual buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.geometry.xres_virtual() || y >= self.geometry.yres_virtual() {
            return None;
        }
        let index = y as usize * self.geometry.stride_pixels() + x as usize;
        self.pixels.get(index).copied()
    }

    /// Stores one pixel at virtual coordinates.  Returns `false` outside the buffer.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: u32) -> bool {
        if x >= self.geometry.xres_virtual() || y >= self.geometry.yres_virtual() {
            return false;
        }
        let index = y as usize * self.geometry.stride_pixels() + x as usize;
        match self.pixels.get_mut(index) {
            Some(p) => {
                *p = value;
                true
            }
            None => false,
        }
    }

    /// Mutable pixels of virtual row `y`, `None` past the last row.
    pub fn row_mut(&mut self, y: u32) -> Option<&mut [u32]> {
        if y >= self.geometry.yres_virtual() {
            return None;
        }
        let stride = self.geometry.stride_pixels();
        let width = self.geometry.xres_virtual() as usize;
        let start = y as usize * stride;
        self.pixels.get_mut(start..start + width)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
