//! Application layer use cases of the emulator.
//!
//! Use cases orchestrate `fbemu_core` state through the traits the
//! infrastructure layer defines, so every loop here runs in tests against
//! scripted channels and recording targets.
//!
//! # Sub-modules
//!
//! - **`control_service`** – The emulated device's command set: screen-info
//!   ioctls with retry-based buffer negotiation, plus device `read`/`write`.
//!
//! - **`session`** – The device-emulation loop: receive, dispatch, reply,
//!   render, with one-shot privilege drop and exactly-once teardown.
//!
//! - **`viewer`** – Mirrors a framebuffer and follows its pan notifications.
//!
//! - **`demo`** – In-process producer/consumer pair exercising the pan
//!   notification channel without a kernel module.

pub mod control_service;
pub mod demo;
pub mod session;
pub mod viewer;
