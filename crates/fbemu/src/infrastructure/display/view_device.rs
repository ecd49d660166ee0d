//! The driver's pan notification device (`/dev/fb_view`).

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use fbemu_core::screen::info::VAR_SCREENINFO_SIZE;
use fbemu_core::VarScreenInfo;

use super::{DisplayError, NotificationSource};

/// Non-blocking handle on the notification device.
///
/// Each read yields one `fb_var_screeninfo` describing the display after the
/// latest pan; the descriptor polls readable only while one is pending.
pub struct ViewDevice {
    file: File,
    path: PathBuf,
}

impl ViewDevice {
    /// # Errors
    ///
    /// [`DisplayError::Open`] if the device cannot be opened.
    pub fn open(path: &Path) -> Result<Self, DisplayError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| DisplayError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "notification device opened");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl NotificationSource for ViewDevice {
    fn descriptor(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }

    fn read_snapshot(&mut self) -> Result<Option<VarScreenInfo>, DisplayError> {
        let mut buf = [0u8; VAR_SCREENINFO_SIZE];
        match self.file.read(&mut buf) {
            Ok(n) if n == VAR_SCREENINFO_SIZE => VarScreenInfo::from_bytes(&buf)
                .map(Some)
                .map_err(|_| DisplayError::ShortRead {
                    read: n,
                    expected: VAR_SCREENINFO_SIZE,
                }),
            Ok(read) => Err(DisplayError::ShortRead {
                read,
                expected: VAR_SCREENINFO_SIZE,
            }),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(None),
            Err(source) => Err(DisplayError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sized_read_decodes_snapshot() {
        // Arrange: a regular file standing in for the device.
        let path = std::env::temp_dir().join(format!("fbemu_view_{}", uuid::Uuid::new_v4()));
        let var = VarScreenInfo {
            xres: 480,
            yres: 800,
            yoffset: 800,
            ..Default::default()
        };
        std::fs::write(&path, var.to_bytes()).unwrap();
        let mut device = ViewDevice::open(&path).unwrap();

        // Act
        let snapshot = device.read_snapshot().unwrap();

        // Assert
        assert_eq!(snapshot, Some(var));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_partial_record_is_a_short_read() {
        let path = std::env::temp_dir().join(format!("fbemu_view_{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, [0u8; 10]).unwrap();
        let mut device = ViewDevice::open(&path).unwrap();

        assert!(matches!(
            device.read_snapshot(),
            Err(DisplayError::ShortRead { read: 10, .. })
        ));
        std::fs::remove_file(&path).ok();
    }
}
