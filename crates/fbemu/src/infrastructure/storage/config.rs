//! TOML-based configuration for the emulator.
//!
//! Reads `AppConfig` from `$XDG_CONFIG_HOME/fbemu/config.toml`, falling back
//! to `~/.config/fbemu/config.toml`, or from an explicit `--config` path.
//! A missing file is not an error: every field has a default.
//!
//! ```toml
//! log_level = "debug"
//!
//! [device]
//! name = "fb_emul"
//! node_mode = 0o666
//!
//! [display]
//! id = "emul_fb"
//! xres = 480
//! yres = 800
//! yres_virtual = 1600
//!
//! [render]
//! backend = "x11"
//! ```
//!
//! Command-line flags override file values after loading.

use std::path::{Path, PathBuf};

use fbemu_core::{DisplayMode, DEFAULT_MEMORY_LIMIT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn kind(&self) -> fbemu_core::FailureKind {
        fbemu_core::FailureKind::Resource
    }
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub privilege: PrivilegeConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

/// The emulated character device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Name under `/dev`.
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Permission bits applied to the node once it appears.
    #[serde(default = "default_node_mode")]
    pub node_mode: u32,
    /// Ceiling on pixel memory in bytes.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
    /// CUSE control device.
    #[serde(default = "default_cuse_path")]
    pub cuse_path: PathBuf,
}

/// Initial geometry of the emulated framebuffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    /// Identifier reported in the fixed screen info.
    #[serde(default = "default_display_id")]
    pub id: String,
    #[serde(flatten)]
    pub mode: DisplayMode,
}

/// How requests are dispatched.  Only one mode is implemented.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Single,
    Concurrent,
}

/// Session loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Upper bound on each readiness wait.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u16,
    #[serde(default)]
    pub dispatch: DispatchMode,
}

/// Device paths used by the kernel mirror mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewerConfig {
    #[serde(default = "default_framebuffer_path")]
    pub framebuffer: PathBuf,
    #[serde(default = "default_notification_path")]
    pub notification: PathBuf,
}

/// Identity to switch to once the device node is set up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrivilegeConfig {
    #[serde(default = "default_true")]
    pub drop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// Presentation backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    #[default]
    Headless,
    X11,
}

/// Rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RenderConfig {
    #[serde(default)]
    pub backend: RenderBackend,
    /// Headless only: PPM file receiving the last frame on shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_device_name() -> String {
    "fb_emul".to_string()
}
fn default_node_mode() -> u32 {
    0o666
}
fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_LIMIT
}
fn default_cuse_path() -> PathBuf {
    PathBuf::from("/dev/cuse")
}
fn default_display_id() -> String {
    "emul_fb".to_string()
}
fn default_poll_timeout_ms() -> u16 {
    10
}
fn default_framebuffer_path() -> PathBuf {
    PathBuf::from("/dev/fb1")
}
fn default_notification_path() -> PathBuf {
    PathBuf::from("/dev/fb_view")
}
fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device: DeviceConfig::default(),
            display: DisplayConfig::default(),
            session: SessionConfig::default(),
            viewer: ViewerConfig::default(),
            privilege: PrivilegeConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            node_mode: default_node_mode(),
            memory_limit: default_memory_limit(),
            cuse_path: default_cuse_path(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            id: default_display_id(),
            mode: DisplayMode::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            dispatch: DispatchMode::default(),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            framebuffer: default_framebuffer_path(),
            notification: default_notification_path(),
        }
    }
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            drop: default_true(),
            uid: None,
            gid: None,
        }
    }
}

impl DeviceConfig {
    /// Path of the node the kernel creates for the emulated device.
    pub fn node_path(&self) -> PathBuf {
        Path::new("/dev").join(&self.name)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if neither `XDG_CONFIG_HOME`
/// nor `HOME` is set.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads `AppConfig` from `path`, or from the default location when `None`.
///
/// Returns `AppConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Ok(p) => p,
            Err(ConfigError::NoPlatformConfigDir) => return Ok(AppConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// XDG_CONFIG_HOME or ~/.config, plus the `fbemu` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("fbemu"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
