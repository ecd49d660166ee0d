//! Post-registration setup of the emulated device node.
//!
//! The kernel creates `/dev/<name>` asynchronously after `CUSE_INIT` is
//! answered, owned by root with mode 0600.  Once the session has serviced
//! its first request the node is made accessible and root is given up.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fbemu_core::FailureKind;
use thiserror::Error;

use crate::infrastructure::privilege::{PrivilegeDropper, PrivilegeError};

/// How long to wait for the kernel to create the node.
pub const NODE_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

const NODE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum DeviceNodeError {
    #[error("device node {0} did not appear")]
    Missing(PathBuf),

    #[error("failed to set mode {mode:o} on {path}: {source}")]
    Chmod {
        path: PathBuf,
        mode: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

impl DeviceNodeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DeviceNodeError::Missing(_) | DeviceNodeError::Chmod { .. } => FailureKind::Resource,
            DeviceNodeError::Privilege(e) => e.kind(),
        }
    }
}

/// Waits up to `timeout` for `path` to exist.  Returns whether it does.
pub fn wait_for_node(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if path.exists() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(NODE_POLL_INTERVAL);
    }
}

/// Applies `mode` to the node at `path`.
///
/// # Errors
///
/// [`DeviceNodeError::Chmod`] if the permissions cannot be changed.
pub fn set_node_mode(path: &Path, mode: u32) -> Result<(), DeviceNodeError> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|source| {
        DeviceNodeError::Chmod {
            path: path.to_path_buf(),
            mode,
            source,
        }
    })
}

/// Runs once, after the session has answered its first request.
pub trait DeviceReadyHook {
    /// # Errors
    ///
    /// Any error aborts the session.
    fn on_first_request(&mut self) -> Result<(), DeviceNodeError>;
}

/// Called when the identity change stopped half-way.  Must not return in
/// production: nothing else may run under a mixed identity.
pub type PartialDropHandler = fn(&PrivilegeError);

fn abort_on_partial_drop(error: &PrivilegeError) {
    tracing::error!("{error}; aborting");
    std::process::abort();
}

/// Node permission fix-up followed by the privilege drop.
pub struct NodeSetup {
    path: PathBuf,
    mode: u32,
    timeout: Duration,
    dropper: Option<PrivilegeDropper>,
    on_partial_drop: PartialDropHandler,
}

impl NodeSetup {
    pub fn new(path: PathBuf, mode: u32, dropper: Option<PrivilegeDropper>) -> Self {
        Self {
            path,
            mode,
            timeout: NODE_WAIT_TIMEOUT,
            dropper,
            on_partial_drop: abort_on_partial_drop,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the default reaction to a partial drop, which aborts the
    /// process before any teardown runs.
    pub fn with_partial_drop_handler(mut self, handler: PartialDropHandler) -> Self {
        self.on_partial_drop = handler;
        self
    }
}

impl DeviceReadyHook for NodeSetup {
    fn on_first_request(&mut self) -> Result<(), DeviceNodeError> {
        if wait_for_node(&self.path, self.timeout) {
            // Without root the chmod fails on a root-owned node; the device
            // stays usable by its owner, so this is not fatal.
            match set_node_mode(&self.path, self.mode) {
                Ok(()) => tracing::info!(
                    path = %self.path.display(),
                    mode = format_args!("{:o}", self.mode),
                    "device node ready"
                ),
                Err(e) => tracing::warn!("{e}"),
            }
        } else {
            tracing::warn!("{}", DeviceNodeError::Missing(self.path.clone()));
        }

        if let Some(dropper) = self.dropper.as_mut() {
            if let Err(e) = dropper.drop_once() {
                if e.is_partial() {
                    (self.on_partial_drop)(&e);
                }
                return Err(e.into());
            }
        }
        Ok(())
    }
}
