//! Persistent configuration.

pub mod config;

pub use config::{load_config, AppConfig, ConfigError, DispatchMode, RenderBackend};
