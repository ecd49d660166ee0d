//! Infrastructure layer of the emulator.
//!
//! Contains OS-facing adapters: the CUSE transport, epoll, signals, device
//! node and credential handling, kernel framebuffer access, presentation
//! backends, and configuration storage.
//!
//! **Dependency rule**: this layer may depend on `fbemu_core`, but MUST NOT
//! import the `application` layer.  Use cases reach it through the traits it
//! defines (`RequestChannel`, `RenderTarget`, `NotificationSource`,
//! `FrameSource`, `DeviceReadyHook`).

pub mod device_node;
pub mod display;
pub mod multiplexer;
pub mod privilege;
pub mod render;
pub mod signal;
pub mod storage;
pub mod transport;
