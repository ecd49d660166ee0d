//! In-process stand-ins for `/dev/fbN` and `/dev/fb_view`.
//!
//! The producer pans through a [`PanDisplay`] whose wakeup writes an
//! eventfd.  The consumer registers that eventfd with its multiplexer exactly
//! as it would the real notification device, then reads snapshots through a
//! [`ViewReader`].

use std::os::fd::{AsFd, BorrowedFd};
use std::sync::{Arc, Mutex, PoisonError};

use fbemu_core::screen::info::VAR_SCREENINFO_SIZE;
use fbemu_core::{
    DisplayBuffer, NotifyError, PanDisplay, PendingSlot, ScreenGeometry, VarScreenInfo,
    ViewReader, Wakeup,
};
use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};

use super::{DisplayError, FrameSource, NotificationSource};
use crate::infrastructure::render::RenderError;

/// [`Wakeup`] that makes an eventfd readable.
pub struct EventFdWakeup {
    fd: EventFd,
}

impl EventFdWakeup {
    /// # Errors
    ///
    /// [`DisplayError::EventFd`] if the kernel refuses an eventfd.
    pub fn new() -> Result<Self, DisplayError> {
        let fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
            .map_err(DisplayError::EventFd)?;
        Ok(Self { fd })
    }

    /// Clears readiness.  Returns the number of wakes since the last drain.
    fn drain(&self) -> Result<u64, DisplayError> {
        match self.fd.read() {
            Ok(count) => Ok(count),
            Err(Errno::EAGAIN) => Ok(0),
            Err(e) => Err(DisplayError::EventFd(e)),
        }
    }
}

impl AsFd for EventFdWakeup {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Wakeup for EventFdWakeup {
    fn wake(&self) {
        if let Err(e) = self.fd.write(1) {
            tracing::warn!("failed to signal pan notification: {e}");
        }
    }
}

/// Consumer end of the loopback notification channel.
pub struct LoopbackNotification {
    reader: ViewReader,
    wakeup: Arc<EventFdWakeup>,
}

impl LoopbackNotification {
    pub fn reader(&self) -> &ViewReader {
        &self.reader
    }
}

/// Builds a connected producer/consumer pair around `geometry`.
///
/// # Errors
///
/// [`DisplayError::EventFd`] if the wakeup cannot be created.
pub fn channel(geometry: ScreenGeometry) -> Result<(PanDisplay, LoopbackNotification), DisplayError> {
    let slot = Arc::new(PendingSlot::new());
    let wakeup = Arc::new(EventFdWakeup::new()?);
    let pan = PanDisplay::new(geometry, Arc::clone(&slot))
        .with_wakeup(Arc::clone(&wakeup) as Arc<dyn Wakeup>);
    let notification = LoopbackNotification {
        reader: ViewReader::open(slot),
        wakeup,
    };
    Ok((pan, notification))
}

impl NotificationSource for LoopbackNotification {
    fn descriptor(&self) -> BorrowedFd<'_> {
        self.wakeup.as_fd()
    }

    fn read_snapshot(&mut self) -> Result<Option<VarScreenInfo>, DisplayError> {
        self.wakeup.drain()?;
        let mut buf = [0u8; VAR_SCREENINFO_SIZE];
        match self.reader.read(&mut buf) {
            Ok(read) => VarScreenInfo::from_bytes(&buf)
                .map(Some)
                .map_err(|_| DisplayError::ShortRead {
                    read,
                    expected: VAR_SCREENINFO_SIZE,
                }),
            Err(NotifyError::WouldBlock) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LoopbackNotification {
    fn drop(&mut self) {
        self.reader.release();
    }
}

/// A [`DisplayBuffer`] shared between the producer and the viewer.
#[derive(Clone)]
pub struct SharedFrame {
    buffer: Arc<Mutex<DisplayBuffer>>,
}

impl SharedFrame {
    pub fn new(buffer: DisplayBuffer) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(buffer)),
        }
    }

    /// Runs `update` with exclusive access to the buffer.
    pub fn update<R>(&self, update: impl FnOnce(&mut DisplayBuffer) -> R) -> R {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut buffer)
    }
}

impl FrameSource for SharedFrame {
    fn geometry(&self) -> ScreenGeometry {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .geometry()
            .clone()
    }

    fn with_pixels(
        &self,
        present: &mut dyn FnMut(&[u32]) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        present(buffer.pixels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbemu_core::DisplayMode;

    fn double_buffered() -> ScreenGeometry {
        ScreenGeometry::new(
            "loop",
            &DisplayMode {
                xres: 4,
                yres: 2,
                xres_virtual: 4,
                yres_virtual: 4,
                bits_per_pixel: 32,
            },
        )
        .expect("valid geometry")
    }

    #[test]
    fn test_pan_makes_descriptor_readable_and_snapshot_available() {
        // Arrange
        let (pan, mut notification) = channel(double_buffered()).unwrap();

        // Act
        pan.pan(0, 2).unwrap();
        let snapshot = notification.read_snapshot().unwrap();

        // Assert
        assert_eq!(snapshot.map(|v| v.yoffset), Some(2));
        assert_eq!(notification.read_snapshot().unwrap(), None);
    }

    #[test]
    fn test_several_pans_coalesce_into_latest_snapshot() {
        let (pan, mut notification) = channel(double_buffered()).unwrap();

        pan.pan(0, 1).unwrap();
        pan.pan(0, 2).unwrap();
        pan.pan(0, 0).unwrap();

        assert_eq!(notification.read_snapshot().unwrap().map(|v| v.yoffset), Some(0));
        assert_eq!(notification.read_snapshot().unwrap(), None);
    }

    #[test]
    fn test_wake_is_visible_to_epoll_until_drained() {
        // Arrange
        let (pan, mut notification) = channel(double_buffered()).unwrap();
        let mut mux = crate::infrastructure::multiplexer::Multiplexer::new().unwrap();
        mux.register(notification.descriptor()).unwrap();

        // Act
        pan.pan(0, 1).unwrap();
        let ready = mux.wait(4, 100).unwrap();
        notification.read_snapshot().unwrap();
        let after_drain = mux.wait(4, 0).unwrap();

        // Assert
        assert_eq!(ready.len(), 1);
        assert!(after_drain.is_empty());
    }

    #[test]
    fn test_shared_frame_lends_current_pixels() {
        let buffer = DisplayBuffer::allocate(double_buffered(), u64::MAX).unwrap();
        let frame = SharedFrame::new(buffer);
        frame.update(|b| b.set_pixel(1, 0, 0xABCD));

        let mut seen = 0;
        frame
            .with_pixels(&mut |pixels| {
                seen = pixels[1];
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, 0xABCD);
    }
}
