//! Read-only mapping of a kernel framebuffer device.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

use fbemu_core::protocol::ioctl::{FBIOGET_FSCREENINFO, FBIOGET_VSCREENINFO};
use fbemu_core::{FixScreenInfo, ScreenGeometry, VarScreenInfo};

use super::{DisplayError, FrameSource};
use crate::infrastructure::render::RenderError;

nix::ioctl_read_bad!(fbioget_vscreeninfo, FBIOGET_VSCREENINFO, VarScreenInfo);
nix::ioctl_read_bad!(fbioget_fscreeninfo, FBIOGET_FSCREENINFO, FixScreenInfo);

/// `/dev/fbN` mapped `PROT_READ`/`MAP_SHARED`.
///
/// The mapping covers `smem_len` bytes and stays valid until drop.  Pixels
/// are read while the producer may be writing them; a torn frame is simply
/// replaced by the next one.
pub struct MappedFramebuffer {
    _file: File,
    path: PathBuf,
    fix: FixScreenInfo,
    geometry: ScreenGeometry,
    base: *mut libc::c_void,
    len: usize,
}

impl MappedFramebuffer {
    /// Opens `path`, queries its geometry and maps its memory.
    ///
    /// # Errors
    ///
    /// - [`DisplayError::Open`] / [`DisplayError::Ioctl`] if the device
    ///   cannot be opened or queried.
    /// - [`DisplayError::Geometry`] for a depth other than 32 bits.
    /// - [`DisplayError::Map`] if `mmap` fails.
    pub fn open(path: &Path) -> Result<Self, DisplayError> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|source| DisplayError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let fd = file.as_raw_fd();

        let mut fix = FixScreenInfo::default();
        let mut var = VarScreenInfo::default();
        // SAFETY: both structs are `repr(C)` mirrors of the kernel layout and
        // live for the duration of the calls.
        unsafe {
            fbioget_fscreeninfo(fd, &mut fix).map_err(|source| DisplayError::Ioctl {
                path: path.to_path_buf(),
                request: "FBIOGET_FSCREENINFO",
                source,
            })?;
            fbioget_vscreeninfo(fd, &mut var).map_err(|source| DisplayError::Ioctl {
                path: path.to_path_buf(),
                request: "FBIOGET_VSCREENINFO",
                source,
            })?;
        }

        let geometry =
            ScreenGeometry::from_kernel(&fix, &var).map_err(|source| DisplayError::Geometry {
                path: path.to_path_buf(),
                source,
            })?;

        let len = fix.smem_len as usize;
        if len == 0 {
            return Err(DisplayError::Map {
                path: path.to_path_buf(),
                len,
                source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
            });
        }
        // SAFETY: `fd` is open for reading, `len` is non-zero and the result
        // is checked against MAP_FAILED.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(DisplayError::Map {
                path: path.to_path_buf(),
                len,
                source: std::io::Error::last_os_error(),
            });
        }

        tracing::info!(
            path = %path.display(),
            id = %geometry.id(),
            xres = geometry.xres(),
            yres = geometry.yres(),
            line_length = geometry.line_length(),
            smem_len = len,
            "framebuffer mapped"
        );

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
            fix,
            geometry,
            base,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fixed_info(&self) -> &FixScreenInfo {
        &self.fix
    }

    fn pixels(&self) -> &[u32] {
        // SAFETY: the mapping is page aligned, `len` bytes long and lives as
        // long as `self`.
        unsafe { std::slice::from_raw_parts(self.base as *const u32, self.len / 4) }
    }
}

impl FrameSource for MappedFramebuffer {
    fn geometry(&self) -> ScreenGeometry {
        self.geometry.clone()
    }

    fn with_pixels(
        &self,
        present: &mut dyn FnMut(&[u32]) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        present(self.pixels())
    }
}

impl Drop for MappedFramebuffer {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe the mapping created in `open`.
        let rc = unsafe { libc::munmap(self.base, self.len) };
        if rc != 0 {
            tracing::warn!(
                path = %self.path.display(),
                "munmap failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}
