//! Framebuffer Emulator: entry point.
//!
//! Gives programs written for an embedded Linux framebuffer a `/dev/fbN`-like
//! device on a desktop and shows what they draw in a window.
//!
//! # Usage
//!
//! ```text
//! fbemu [--config PATH] [--backend headless|x11] [--snapshot FILE] <COMMAND>
//!
//! Commands:
//!   emulate   Create /dev/fb_emul through CUSE and render its buffer
//!   view      Mirror a kernel framebuffer (/dev/fb1 + /dev/fb_view)
//!   demo      In-process double-buffering producer mirrored by the viewer
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present; both override the config
//! file.
//!
//! | Variable                 | Description                          |
//! |--------------------------|--------------------------------------|
//! | `FBEMU_CONFIG`           | Config file path                     |
//! | `FBEMU_BACKEND`          | `headless` or `x11`                  |
//! | `FBEMU_SNAPSHOT`         | PPM file for the last headless frame |
//! | `FBEMU_POLL_TIMEOUT_MS`  | Upper bound on each readiness wait   |
//! | `FBEMU_DEVICE_NAME`      | Name of the emulated device node     |
//! | `FBEMU_XRES`/`FBEMU_YRES`| Initial resolution                   |
//! | `FBEMU_FRAMEBUFFER`      | Framebuffer mirrored by `view`       |
//! | `FBEMU_NOTIFICATION`     | Notification device used by `view`   |
//! | `RUST_LOG`               | `tracing` filter; overrides `log_level` |
//!
//! # Exit status
//!
//! 0 on every orderly shutdown, including after a failure that was logged.
//! A privilege drop that fails half-way aborts the process on the spot,
//! before any teardown runs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fbemu::application::control_service::FramebufferControlService;
use fbemu::application::demo;
use fbemu::application::session::{Session, SessionOptions};
use fbemu::application::viewer::Viewer;
use fbemu::infrastructure::device_node::NodeSetup;
use fbemu::infrastructure::display::{FrameSource, MappedFramebuffer, ViewDevice};
use fbemu::infrastructure::multiplexer::Multiplexer;
use fbemu::infrastructure::privilege::PrivilegeDropper;
use fbemu::infrastructure::render::open_target;
use fbemu::infrastructure::signal;
use fbemu::infrastructure::storage::{load_config, AppConfig, ConfigError, RenderBackend};
use fbemu::infrastructure::transport::CuseChannel;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Headless,
    X11,
}

impl From<BackendArg> for RenderBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Headless => RenderBackend::Headless,
            BackendArg::X11 => RenderBackend::X11,
        }
    }
}

/// Linux framebuffer emulator.
#[derive(Debug, Parser)]
#[command(name = "fbemu", about = "Linux framebuffer emulator", version)]
struct Cli {
    /// Configuration file.
    ///
    /// Defaults to `$XDG_CONFIG_HOME/fbemu/config.toml`.  A missing file
    /// means built-in defaults.
    #[arg(long, global = true, env = "FBEMU_CONFIG")]
    config: Option<PathBuf>,

    /// Presentation backend.
    #[arg(long, global = true, value_enum, env = "FBEMU_BACKEND")]
    backend: Option<BackendArg>,

    /// Headless backend: write the last frame to this PPM file on exit.
    #[arg(long, global = true, env = "FBEMU_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Upper bound on each readiness wait, in milliseconds.
    #[arg(long, global = true, env = "FBEMU_POLL_TIMEOUT_MS")]
    poll_timeout_ms: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an emulated framebuffer device through CUSE and render it.
    Emulate {
        /// Device name under /dev.
        #[arg(long, env = "FBEMU_DEVICE_NAME")]
        name: Option<String>,

        /// Initial horizontal resolution.
        #[arg(long, env = "FBEMU_XRES")]
        xres: Option<u32>,

        /// Initial vertical resolution.
        #[arg(long, env = "FBEMU_YRES")]
        yres: Option<u32>,

        /// Keep root privileges after the device node is set up.
        #[arg(long)]
        keep_privileges: bool,
    },

    /// Mirror a kernel framebuffer and follow its pan notifications.
    View {
        #[arg(long, env = "FBEMU_FRAMEBUFFER")]
        framebuffer: Option<PathBuf>,

        #[arg(long, env = "FBEMU_NOTIFICATION")]
        notification: Option<PathBuf>,
    },

    /// Run the in-process double-buffering demo.
    Demo {
        #[arg(long, env = "FBEMU_XRES")]
        xres: Option<u32>,

        #[arg(long, env = "FBEMU_YRES")]
        yres: Option<u32>,

        /// Delay between producer frames in milliseconds.
        #[arg(long, default_value_t = 33)]
        frame_interval_ms: u64,
    },
}

impl Cli {
    /// Layers the command-line overrides on top of the file configuration.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(backend) = self.backend {
            config.render.backend = backend.into();
        }
        if let Some(snapshot) = &self.snapshot {
            config.render.snapshot = Some(snapshot.clone());
        }
        if let Some(timeout) = self.poll_timeout_ms {
            config.session.poll_timeout_ms = timeout;
        }
        match &self.command {
            Command::Emulate {
                name,
                xres,
                yres,
                keep_privileges,
            } => {
                if let Some(name) = name {
                    config.device.name = name.clone();
                }
                apply_resolution(config, *xres, *yres);
                if *keep_privileges {
                    config.privilege.drop = false;
                }
            }
            Command::View {
                framebuffer,
                notification,
            } => {
                if let Some(path) = framebuffer {
                    config.viewer.framebuffer = path.clone();
                }
                if let Some(path) = notification {
                    config.viewer.notification = path.clone();
                }
            }
            Command::Demo { xres, yres, .. } => apply_resolution(config, *xres, *yres),
        }
    }
}

fn apply_resolution(config: &mut AppConfig, xres: Option<u32>, yres: Option<u32>) {
    if let Some(xres) = xres {
        config.display.mode.xres = xres;
    }
    if let Some(yres) = yres {
        config.display.mode.yres = yres;
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    let loaded = load_config(cli.config.as_deref());

    // `RUST_LOG` wins; otherwise the configured level, or `info` if the
    // config itself failed to load.
    let level = loaded
        .as_ref()
        .map(|config| config.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!("Framebuffer Emulator ver. {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli, loaded) {
        tracing::error!("{e:#}");
    }

    info!("done");
}

fn run(cli: Cli, loaded: Result<AppConfig, ConfigError>) -> anyhow::Result<()> {
    let mut config = loaded.context("failed to load configuration")?;
    cli.apply_overrides(&mut config);
    signal::install_termination_handlers().context("failed to install signal handlers")?;

    match cli.command {
        Command::Emulate { .. } => run_emulate(&config),
        Command::View { .. } => run_view(&config),
        Command::Demo {
            frame_interval_ms, ..
        } => run_demo(&config, Duration::from_millis(frame_interval_ms)),
    }
}

fn run_emulate(config: &AppConfig) -> anyhow::Result<()> {
    let service = FramebufferControlService::new(
        &config.display.id,
        &config.display.mode,
        config.device.memory_limit,
    )
    .context("invalid display configuration")?;
    let (xres, yres) = (service.geometry().xres(), service.geometry().yres());
    let target = open_target(&config.render, xres, yres).context("failed to open render target")?;

    let channel = CuseChannel::open(&config.device.cuse_path)?;
    let dropper = config
        .privilege
        .drop
        .then(|| PrivilegeDropper::for_process(&config.privilege));
    let hook = NodeSetup::new(config.device.node_path(), config.device.node_mode, dropper);

    let session = Session::new(
        Box::new(channel),
        Multiplexer::new()?,
        service,
        target,
        Some(Box::new(hook)),
        SessionOptions::from_config(config),
    )?;
    let summary = session.run().context("emulation session failed")?;
    info!(
        session = %summary.id,
        requests = summary.requests_serviced,
        frames = summary.frames_presented,
        "emulation finished"
    );
    Ok(())
}

fn run_view(config: &AppConfig) -> anyhow::Result<()> {
    let frames = MappedFramebuffer::open(&config.viewer.framebuffer)?;
    let notifications = ViewDevice::open(&config.viewer.notification)?;
    let geometry = frames.geometry();
    let target = open_target(&config.render, geometry.xres(), geometry.yres())
        .context("failed to open render target")?;

    let mut viewer = Viewer::new(
        frames,
        notifications,
        target,
        Multiplexer::new()?,
        config.session.poll_timeout_ms,
    );
    let summary = viewer.run().context("viewer failed")?;
    info!(
        notifications = summary.notifications,
        frames = summary.frames_presented,
        "viewer finished"
    );
    Ok(())
}

fn run_demo(config: &AppConfig, frame_interval: Duration) -> anyhow::Result<()> {
    let mode = &config.display.mode;
    let target = open_target(&config.render, mode.xres, mode.yres)
        .context("failed to open render target")?;
    demo::run_demo(
        &config.display.id,
        mode,
        config.device.memory_limit,
        target,
        config.session.poll_timeout_ms,
        frame_interval,
    )
    .context("demo failed")?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
