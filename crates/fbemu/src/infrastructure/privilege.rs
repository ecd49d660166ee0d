//! One-shot privilege drop.
//!
//! Opening `/dev/cuse` needs root.  Once the kernel has created the device
//! node and the first request has been answered there is no reason to keep
//! it, so the session switches to the invoking user:
//!
//! 1. supplementary groups → `[gid]`
//! 2. real/effective/saved gid → `gid`
//! 3. real/effective/saved uid → `uid`
//!
//! The order matters: once the uid is gone the process can no longer change
//! its groups.  If step 1 fails nothing has changed.  If step 2 or 3 fails
//! the process holds a mixed identity and must not continue.

use fbemu_core::FailureKind;
use nix::errno::Errno;
use nix::unistd::{self, Gid, Uid};
use thiserror::Error;

use crate::infrastructure::storage::config::PrivilegeConfig;

/// Errors produced by [`PrivilegeDropper::drop_once`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrivilegeError {
    /// Supplementary groups could not be set; the identity is unchanged.
    #[error("failed to set supplementary groups: {0}")]
    Groups(#[source] Errno),

    /// A later step failed after earlier steps succeeded.
    #[error("privilege drop left a partial identity: {step} failed: {source}")]
    Partial {
        step: &'static str,
        #[source]
        source: Errno,
    },
}

impl PrivilegeError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Permission
    }

    /// `true` when the process identity is inconsistent and the process
    /// must abort instead of shutting down cleanly.
    pub fn is_partial(&self) -> bool {
        matches!(self, PrivilegeError::Partial { .. })
    }
}

/// The identity syscalls the dropper needs.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityOps {
    fn effective_uid(&self) -> u32;
    fn set_groups(&self, gid: u32) -> nix::Result<()>;
    fn set_gid(&self, gid: u32) -> nix::Result<()>;
    fn set_uid(&self, uid: u32) -> nix::Result<()>;
}

/// [`IdentityOps`] backed by the real process credentials.
pub struct SystemIdentity;

impl IdentityOps for SystemIdentity {
    fn effective_uid(&self) -> u32 {
        unistd::geteuid().as_raw()
    }

    fn set_groups(&self, gid: u32) -> nix::Result<()> {
        unistd::setgroups(&[Gid::from_raw(gid)])
    }

    fn set_gid(&self, gid: u32) -> nix::Result<()> {
        let gid = Gid::from_raw(gid);
        unistd::setresgid(gid, gid, gid)
    }

    fn set_uid(&self, uid: u32) -> nix::Result<()> {
        let uid = Uid::from_raw(uid);
        unistd::setresuid(uid, uid, uid)
    }
}

/// The unprivileged identity to switch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl TargetIdentity {
    /// Resolves the target from the configuration, then `SUDO_UID` /
    /// `SUDO_GID`, then the real ids of this process.
    pub fn resolve(config: &PrivilegeConfig) -> Self {
        Self::resolve_with(
            config,
            |name| std::env::var(name).ok(),
            unistd::getuid().as_raw(),
            unistd::getgid().as_raw(),
        )
    }

    pub fn resolve_with(
        config: &PrivilegeConfig,
        env: impl Fn(&str) -> Option<String>,
        real_uid: u32,
        real_gid: u32,
    ) -> Self {
        let from_env = |name: &str| env(name).and_then(|v| v.trim().parse::<u32>().ok());
        Self {
            uid: config
                .uid
                .or_else(|| from_env("SUDO_UID"))
                .unwrap_or(real_uid),
            gid: config
                .gid
                .or_else(|| from_env("SUDO_GID"))
                .unwrap_or(real_gid),
        }
    }
}

/// What [`PrivilegeDropper::drop_once`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Dropped,
    /// An earlier call already completed the transition.
    AlreadyDone,
    /// The process was not running as root; recorded as done.
    NotPrivileged,
}

/// Moves the process from root to the target identity exactly once.
pub struct PrivilegeDropper {
    ops: Box<dyn IdentityOps + Send>,
    target: TargetIdentity,
    done: bool,
}

impl PrivilegeDropper {
    pub fn new(ops: Box<dyn IdentityOps + Send>, target: TargetIdentity) -> Self {
        Self {
            ops,
            target,
            done: false,
        }
    }

    /// Dropper for the current process using the configured target.
    pub fn for_process(config: &PrivilegeConfig) -> Self {
        Self::new(Box::new(SystemIdentity), TargetIdentity::resolve(config))
    }

    pub fn target(&self) -> TargetIdentity {
        self.target
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Performs the transition if it has not happened yet.
    ///
    /// # Errors
    ///
    /// [`PrivilegeError::Groups`] if the first step fails (nothing changed),
    /// [`PrivilegeError::Partial`] if a later step fails.
    pub fn drop_once(&mut self) -> Result<DropOutcome, PrivilegeError> {
        if self.done {
            return Ok(DropOutcome::AlreadyDone);
        }
        if self.ops.effective_uid() != 0 {
            self.done = true;
            tracing::debug!("not running as root; privilege drop skipped");
            return Ok(DropOutcome::NotPrivileged);
        }

        let TargetIdentity { uid, gid } = self.target;
        self.ops.set_groups(gid).map_err(PrivilegeError::Groups)?;
        self.ops
            .set_gid(gid)
            .map_err(|source| PrivilegeError::Partial { step: "setresgid", source })?;
        self.ops
            .set_uid(uid)
            .map_err(|source| PrivilegeError::Partial { step: "setresuid", source })?;

        self.done = true;
        tracing::info!(uid, gid, "privileges dropped");
        Ok(DropOutcome::Dropped)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::{predicate::eq, Sequence};

    const TARGET: TargetIdentity = TargetIdentity { uid: 1000, gid: 100 };

    fn root_mock() -> MockIdentityOps {
        let mut ops = MockIdentityOps::new();
        ops.expect_effective_uid().return_const(0u32);
        ops
    }

    #[test]
    fn test_steps_run_groups_then_gid_then_uid() {
        // Arrange
        let mut seq = Sequence::new();
        let mut ops = root_mock();
        ops.expect_set_groups()
            .with(eq(100))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        ops.expect_set_gid()
            .with(eq(100))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        ops.expect_set_uid()
            .with(eq(1000))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let mut dropper = PrivilegeDropper::new(Box::new(ops), TARGET);

        // Act
        let outcome = dropper.drop_once();

        // Assert
        assert_eq!(outcome, Ok(DropOutcome::Dropped));
        assert!(dropper.is_done());
    }

    #[test]
    fn test_second_call_makes_no_syscalls() {
        // Arrange
        let mut ops = root_mock();
        ops.expect_set_groups().times(1).returning(|_| Ok(()));
        ops.expect_set_gid().times(1).returning(|_| Ok(()));
        ops.expect_set_uid().times(1).returning(|_| Ok(()));
        let mut dropper = PrivilegeDropper::new(Box::new(ops), TARGET);
        dropper.drop_once().expect("first drop");

        // Act
        let second = dropper.drop_once();

        // Assert
        assert_eq!(second, Ok(DropOutcome::AlreadyDone));
    }

    #[test]
    fn test_groups_failure_is_not_partial() {
        // Arrange
        let mut ops = root_mock();
        ops.expect_set_groups().returning(|_| Err(Errno::EPERM));
        ops.expect_set_gid().never();
        ops.expect_set_uid().never();
        let mut dropper = PrivilegeDropper::new(Box::new(ops), TARGET);

        // Act
        let err = dropper.drop_once().unwrap_err();

        // Assert
        assert_eq!(err, PrivilegeError::Groups(Errno::EPERM));
        assert!(!err.is_partial());
        assert_eq!(err.kind(), FailureKind::Permission);
        assert!(!dropper.is_done());
    }

    #[test]
    fn test_uid_failure_after_gid_is_partial() {
        // Arrange
        let mut ops = root_mock();
        ops.expect_set_groups().returning(|_| Ok(()));
        ops.expect_set_gid().returning(|_| Ok(()));
        ops.expect_set_uid().returning(|_| Err(Errno::EAGAIN));
        let mut dropper = PrivilegeDropper::new(Box::new(ops), TARGET);

        // Act
        let err = dropper.drop_once().unwrap_err();

        // Assert
        assert!(err.is_partial());
        assert!(matches!(err, PrivilegeError::Partial { step: "setresuid", .. }));
    }

    #[test]
    fn test_unprivileged_process_is_recorded_as_done_without_syscalls() {
        // Arrange
        let mut ops = MockIdentityOps::new();
        ops.expect_effective_uid().return_const(1000u32);
        ops.expect_set_groups().never();
        let mut dropper = PrivilegeDropper::new(Box::new(ops), TARGET);

        // Act / Assert
        assert_eq!(dropper.drop_once(), Ok(DropOutcome::NotPrivileged));
        assert_eq!(dropper.drop_once(), Ok(DropOutcome::AlreadyDone));
    }

    #[test]
    fn test_target_prefers_config_then_sudo_then_real_ids() {
        let env = |name: &str| match name {
            "SUDO_UID" => Some("1001".to_string()),
            "SUDO_GID" => Some("1002".to_string()),
            _ => None,
        };

        let configured = PrivilegeConfig {
            uid: Some(5),
            ..Default::default()
        };
        assert_eq!(
            TargetIdentity::resolve_with(&configured, env, 0, 0),
            TargetIdentity { uid: 5, gid: 1002 }
        );

        assert_eq!(
            TargetIdentity::resolve_with(&PrivilegeConfig::default(), |_| None, 7, 8),
            TargetIdentity { uid: 7, gid: 8 }
        );
    }

    #[test]
    fn test_unparsable_sudo_ids_fall_back_to_real_ids() {
        let env = |_: &str| Some("not-a-number".to_string());
        assert_eq!(
            TargetIdentity::resolve_with(&PrivilegeConfig::default(), env, 3, 4),
            TargetIdentity { uid: 3, gid: 4 }
        );
    }
}
