//! `/dev/cuse` transport.
//!
//! Opening the control device starts a CUSE connection.  The kernel's first
//! request is `CUSE_INIT`; once it is answered with a device name the kernel
//! creates `/dev/<name>` and forwards every file operation on it here.
//!
//! Each `read` on the control device returns exactly one request, and each
//! `write` must carry exactly one complete reply.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use super::{ChannelError, Received, RequestChannel};

/// Largest read or write payload announced to the kernel.
pub const MAX_TRANSFER: u32 = 128 * 1024;

/// Room for the largest write request: headers plus payload.
const RECEIVE_BUFFER_SIZE: usize = MAX_TRANSFER as usize + 4096;

/// Connection to the kernel's CUSE driver.
pub struct CuseChannel {
    file: File,
    buffer: Vec<u8>,
}

impl CuseChannel {
    /// Opens the CUSE control device at `path`.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Open`] if the device is missing or not accessible
    /// (usually: the `cuse` module is not loaded or the process is not root).
    pub fn open(path: &Path) -> Result<Self, ChannelError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ChannelError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(path = %path.display(), "CUSE control device opened");
        Ok(Self {
            file,
            buffer: vec![0; RECEIVE_BUFFER_SIZE],
        })
    }
}

impl RequestChannel for CuseChannel {
    fn descriptor(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }

    fn receive(&mut self) -> Result<Received, ChannelError> {
        if self.buffer.is_empty() {
            self.buffer.resize(RECEIVE_BUFFER_SIZE, 0);
        }
        match self.file.read(&mut self.buffer) {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => Ok(Received::Request(self.buffer[..n].to_vec())),
            Err(e) if e.kind() == ErrorKind::Interrupted || e.kind() == ErrorKind::WouldBlock => {
                Ok(Received::Interrupted)
            }
            // The kernel reports a request that was aborted before we read it.
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(Received::Interrupted),
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => Ok(Received::Closed),
            Err(e) => Err(ChannelError::Receive(e)),
        }
    }

    fn send(&mut self, reply: &[u8]) -> Result<(), ChannelError> {
        match self.file.write(reply) {
            Ok(n) if n == reply.len() => Ok(()),
            Ok(n) => Err(ChannelError::ShortWrite {
                written: n,
                expected: reply.len(),
            }),
            // The request was interrupted and the kernel no longer waits for it.
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                tracing::debug!("reply dropped for an interrupted request");
                Ok(())
            }
            Err(e) => Err(ChannelError::Send(e)),
        }
    }

    fn release(&mut self) {
        self.buffer = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_reports_path() {
        let err = match CuseChannel::open(Path::new("/nonexistent/cuse")) {
            Err(e) => e,
            Ok(_) => panic!("opening a missing device must fail"),
        };
        assert!(matches!(err, ChannelError::Open { .. }));
        assert!(err.to_string().contains("/nonexistent/cuse"));
    }
}
