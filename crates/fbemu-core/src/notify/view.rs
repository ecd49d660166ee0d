use std::sync::Arc;
use std::time::Duration;

use crate::notify::{NotifyError, PendingSlot};
use crate::screen::info::{VarScreenInfo, VAR_SCREENINFO_SIZE};

/// Consumer side of the pan notification channel.
///
/// Behaves like an open handle on `/dev/fb_view`: opening clears any stale
/// notification, a read hands out the latest snapshot once, and releasing
/// the handle unblocks anyone still waiting.
pub struct ViewReader {
    slot: Arc<PendingSlot<VarScreenInfo>>,
}

impl ViewReader {
    /// Opens the channel.  A pan that happened before the open is forgotten.
    pub fn open(slot: Arc<PendingSlot<VarScreenInfo>>) -> Self {
        slot.reset();
        Self { slot }
    }

    /// Copies the latest snapshot into `buf` and clears the pending flag.
    ///
    /// Returns the number of bytes written, always [`VAR_SCREENINFO_SIZE`].
    ///
    /// # Errors
    ///
    /// - [`NotifyError::NoBuffers`] if `buf` cannot hold a snapshot.
    /// - [`NotifyError::WouldBlock`] if no pan is pending.
    /// - [`NotifyError::NoData`] if the channel has been released.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, NotifyError> {
        if buf.len() < VAR_SCREENINFO_SIZE {
            return Err(NotifyError::NoBuffers {
                needed: VAR_SCREENINFO_SIZE,
                available: buf.len(),
            });
        }
        if self.slot.is_closed() {
            return Err(NotifyError::NoData);
        }
        let snapshot = self.slot.take().ok_or(NotifyError::WouldBlock)?;
        buf[..VAR_SCREENINFO_SIZE].copy_from_slice(&snapshot.to_bytes());
        Ok(VAR_SCREENINFO_SIZE)
    }

    /// Takes the latest snapshot without going through bytes.
    pub fn read_snapshot(&self) -> Option<VarScreenInfo> {
        self.slot.take()
    }

    /// `true` while a notification is waiting to be read.
    pub fn poll_readable(&self) -> bool {
        self.slot.is_pending()
    }

    /// Blocks until a pan is pending or `timeout` passes.
    ///
    /// # Errors
    ///
    /// [`NotifyError::NoData`] if the channel is released while waiting.
    pub fn wait_readable(&self, timeout: Duration) -> Result<Option<VarScreenInfo>, NotifyError> {
        self.slot.wait_take(timeout)
    }

    /// Closes the channel; blocked waiters return [`NotifyError::NoData`].
    pub fn release(&self) {
        self.slot.close();
    }
}
