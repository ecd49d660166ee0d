//! Validated framebuffer geometry.
//!
//! [`ScreenGeometry`] is the single source of truth for resolution, virtual
//! size, pan offsets and stride.  Every constructor and mutator upholds:
//!
//! - `xres_virtual >= xres + xoffset`
//! - `yres_virtual >= yres + yoffset`
//! - `bits_per_pixel == 32`
//!
//! A rejected change leaves the geometry exactly as it was.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FailureKind;
use crate::screen::info::{
    FixScreenInfo, VarScreenInfo, FB_ACCEL_NONE, FB_ACTIVATE_NOW, FB_TYPE_PACKED_PIXELS,
    FB_VISUAL_TRUECOLOR, FB_VMODE_NONINTERLACED,
};

/// The only colour depth the emulator handles.
pub const SUPPORTED_DEPTH: u32 = 32;

/// Bytes per pixel at [`SUPPORTED_DEPTH`].
pub const BYTES_PER_PIXEL: usize = 4;

/// Errors produced when building or changing a [`ScreenGeometry`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    /// Only 32 bits per pixel is supported.
    #[error("unsupported colour depth: {0} bits per pixel")]
    UnsupportedDepth(u32),

    /// The visible window would leave the virtual buffer.
    #[error(
        "pan to ({xoffset}, {yoffset}) leaves the {xres_virtual}x{yres_virtual} virtual buffer"
    )]
    PanOutOfRange {
        xoffset: u32,
        yoffset: u32,
        xres_virtual: u32,
        yres_virtual: u32,
    },

    /// The geometry violates an invariant that cannot be normalised away.
    #[error("invalid geometry: {0}")]
    Invalid(String),
}

impl GeometryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GeometryError::UnsupportedDepth(_) => FailureKind::UnsupportedConfiguration,
            GeometryError::PanOutOfRange { .. } | GeometryError::Invalid(_) => {
                FailureKind::InvalidArgument
            }
        }
    }
}

/// A display mode as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMode {
    #[serde(default = "default_xres")]
    pub xres: u32,
    #[serde(default = "default_yres")]
    pub yres: u32,
    /// Zero means "same as `xres`".
    #[serde(default)]
    pub xres_virtual: u32,
    /// Zero means "same as `yres`".
    #[serde(default)]
    pub yres_virtual: u32,
    #[serde(default = "default_depth")]
    pub bits_per_pixel: u32,
}

fn default_xres() -> u32 {
    480
}

fn default_yres() -> u32 {
    800
}

fn default_depth() -> u32 {
    SUPPORTED_DEPTH
}

impl Default for DisplayMode {
    fn default() -> Self {
        Self {
            xres: default_xres(),
            yres: default_yres(),
            xres_virtual: 0,
            yres_virtual: 0,
            bits_per_pixel: default_depth(),
        }
    }
}

/// Resolution, virtual size, pan offsets and stride of a 32-bit framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenGeometry {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    line_length: u32,
    id: String,
}

/// Row stride in bytes, rounded up to a 32-bit boundary.
fn stride_for(xres_virtual: u32, bits_per_pixel: u32) -> Result<u32, GeometryError> {
    let bits = u64::from(xres_virtual) * u64::from(bits_per_pixel);
    let bytes = ((bits + 31) & !31) >> 3;
    u32::try_from(bytes)
        .map_err(|_| GeometryError::Invalid(format!("row of {xres_virtual} pixels is too wide")))
}

fn check_depth(bits_per_pixel: u32) -> Result<(), GeometryError> {
    if bits_per_pixel != SUPPORTED_DEPTH {
        return Err(GeometryError::UnsupportedDepth(bits_per_pixel));
    }
    Ok(())
}

fn sum(a: u32, b: u32) -> Result<u32, GeometryError> {
    a.checked_add(b)
        .ok_or_else(|| GeometryError::Invalid(format!("{a} + {b} overflows")))
}

impl ScreenGeometry {
    /// Builds a geometry with no pan offset.
    ///
    /// Zero virtual sizes default to the visible resolution.
    ///
    /// # Errors
    ///
    /// [`GeometryError::UnsupportedDepth`] for any depth other than 32,
    /// [`GeometryError::Invalid`] for a zero resolution or a virtual size
    /// smaller than the visible one.
    pub fn new(id: &str, mode: &DisplayMode) -> Result<Self, GeometryError> {
        check_depth(mode.bits_per_pixel)?;
        if mode.xres == 0 || mode.yres == 0 {
            return Err(GeometryError::Invalid(format!(
                "zero resolution {}x{}",
                mode.xres, mode.yres
            )));
        }
        let xres_virtual = if mode.xres_virtual == 0 { mode.xres } else { mode.xres_virtual };
        let yres_virtual = if mode.yres_virtual == 0 { mode.yres } else { mode.yres_virtual };
        if xres_virtual < mode.xres || yres_virtual < mode.yres {
            return Err(GeometryError::Invalid(format!(
                "virtual size {xres_virtual}x{yres_virtual} is smaller than {}x{}",
                mode.xres, mode.yres
            )));
        }
        Ok(Self {
            xres: mode.xres,
            yres: mode.yres,
            xres_virtual,
            yres_virtual,
            xoffset: 0,
            yoffset: 0,
            bits_per_pixel: mode.bits_per_pixel,
            line_length: stride_for(xres_virtual, mode.bits_per_pixel)?,
            id: id.to_owned(),
        })
    }

    /// Builds a geometry from a variable-info request, normalising it first.
    ///
    /// Zero `xres`/`yres` become 1 and the virtual size grows to cover the
    /// visible window at its offset.  The stride is recomputed.
    ///
    /// # Errors
    ///
    /// [`GeometryError::UnsupportedDepth`] before anything else is looked at.
    pub fn from_var(id: &str, var: &VarScreenInfo) -> Result<Self, GeometryError> {
        check_depth(var.bits_per_pixel)?;
        let xres = var.xres.max(1);
        let yres = var.yres.max(1);
        let xres_virtual = var.xres_virtual.max(sum(xres, var.xoffset)?);
        let yres_virtual = var.yres_virtual.max(sum(yres, var.yoffset)?);
        Ok(Self {
            xres,
            yres,
            xres_virtual,
            yres_virtual,
            xoffset: var.xoffset,
            yoffset: var.yoffset,
            bits_per_pixel: var.bits_per_pixel,
            line_length: stride_for(xres_virtual, var.bits_per_pixel)?,
            id: id.to_owned(),
        })
    }

    /// Builds a geometry from the info a real framebuffer device reported.
    ///
    /// The kernel's `line_length` is kept as-is.
    ///
    /// # Errors
    ///
    /// [`GeometryError::UnsupportedDepth`] for depths other than 32,
    /// [`GeometryError::Invalid`] if the device reports a window outside its
    /// virtual buffer or a stride too short for a row.
    pub fn from_kernel(fix: &FixScreenInfo, var: &VarScreenInfo) -> Result<Self, GeometryError> {
        check_depth(var.bits_per_pixel)?;
        if sum(var.xres, var.xoffset)? > var.xres_virtual
            || sum(var.yres, var.yoffset)? > var.yres_virtual
        {
            return Err(GeometryError::Invalid(format!(
                "visible {}x{}+{}+{} exceeds virtual {}x{}",
                var.xres, var.yres, var.xoffset, var.yoffset, var.xres_virtual, var.yres_virtual
            )));
        }
        let min_stride = stride_for(var.xres_virtual, var.bits_per_pixel)?;
        if fix.line_length < min_stride {
            return Err(GeometryError::Invalid(format!(
                "line length {} is shorter than {min_stride}",
                fix.line_length
            )));
        }
        Ok(Self {
            xres: var.xres,
            yres: var.yres,
            xres_virtual: var.xres_virtual,
            yres_virtual: var.yres_virtual,
            xoffset: var.xoffset,
            yoffset: var.yoffset,
            bits_per_pixel: var.bits_per_pixel,
            line_length: fix.line_length,
            id: fix.id_str(),
        })
    }

    pub fn xres(&self) -> u32 {
        self.xres
    }

    pub fn yres(&self) -> u32 {
        self.yres
    }

    pub fn xres_virtual(&self) -> u32 {
        self.xres_virtual
    }

    pub fn yres_virtual(&self) -> u32 {
        self.yres_virtual
    }

    pub fn xoffset(&self) -> u32 {
        self.xoffset
    }

    pub fn yoffset(&self) -> u32 {
        self.yoffset
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    /// Row stride in bytes.
    pub fn line_length(&self) -> u32 {
        self.line_length
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Size in bytes of the pixel memory this geometry describes.
    pub fn buffer_len_bytes(&self) -> u64 {
        u64::from(self.line_length) * u64::from(self.yres_virtual)
    }

    /// Number of whole 32-bit pixels that fit in [`Self::buffer_len_bytes`].
    pub fn pixel_capacity(&self) -> u64 {
        self.buffer_len_bytes() / BYTES_PER_PIXEL as u64
    }

    /// Row stride in pixels.
    pub fn stride_pixels(&self) -> usize {
        self.line_length as usize / BYTES_PER_PIXEL
    }

    /// Returns `true` if the visible resolution differs from `other`'s.
    pub fn resolution_differs(&self, other: &ScreenGeometry) -> bool {
        self.xres != other.xres || self.yres != other.yres
    }

    /// Moves the visible window.
    ///
    /// # Errors
    ///
    /// [`GeometryError::PanOutOfRange`] if the window would leave the virtual
    /// buffer.  The offsets are left untouched.
    pub fn pan(&mut self, xoffset: u32, yoffset: u32) -> Result<(), GeometryError> {
        let reject = || GeometryError::PanOutOfRange {
            xoffset,
            yoffset,
            xres_virtual: self.xres_virtual,
            yres_virtual: self.yres_virtual,
        };
        let right = self.xres.checked_add(xoffset).ok_or_else(reject)?;
        let bottom = self.yres.checked_add(yoffset).ok_or_else(reject)?;
        if right > self.xres_virtual || bottom > self.yres_virtual {
            return Err(reject());
        }
        self.xoffset = xoffset;
        self.yoffset = yoffset;
        Ok(())
    }

    /// Adopts the offsets and resolution of a notification snapshot.
    ///
    /// The virtual size and stride stay those of the mapped memory.
    ///
    /// # Errors
    ///
    /// [`GeometryError::UnsupportedDepth`] or [`GeometryError::PanOutOfRange`];
    /// the geometry is unchanged on error.
    pub fn apply_snapshot(&mut self, var: &VarScreenInfo) -> Result<(), GeometryError> {
        check_depth(var.bits_per_pixel)?;
        let mut next = self.clone();
        next.xres = var.xres.clamp(1, self.xres_virtual);
        next.yres = var.yres.clamp(1, self.yres_virtual);
        next.pan(var.xoffset, var.yoffset)?;
        *self = next;
        Ok(())
    }

    /// Variable screen info describing this geometry in RGBA8888.
    pub fn to_var(&self) -> VarScreenInfo {
        let mut var = VarScreenInfo {
            xres: self.xres,
            yres: self.yres,
            xres_virtual: self.xres_virtual,
            yres_virtual: self.yres_virtual,
            xoffset: self.xoffset,
            yoffset: self.yoffset,
            bits_per_pixel: self.bits_per_pixel,
            activate: FB_ACTIVATE_NOW,
            vmode: FB_VMODE_NONINTERLACED,
            ..Default::default()
        };
        var.set_rgba8888();
        var
    }

    /// Fixed screen info for this geometry.
    ///
    /// `smem_start` is the physical address of the pixel memory, 0 when there
    /// is none to report.
    pub fn to_fix(&self, smem_start: u64, smem_len: u32) -> FixScreenInfo {
        let mut fix = FixScreenInfo {
            smem_start: smem_start as std::ffi::c_ulong,
            smem_len,
            type_: FB_TYPE_PACKED_PIXELS,
            visual: FB_VISUAL_TRUECOLOR,
            xpanstep: 1,
            ypanstep: 1,
            line_length: self.line_length,
            accel: FB_ACCEL_NONE,
            ..Default::default()
        };
        fix.set_id(&self.id);
        fix
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
