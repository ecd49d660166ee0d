//! CUSE transport codec and the framebuffer ioctl protocol.
//!
//! - [`fuse`]: request/reply framing on `/dev/cuse`.
//! - [`ioctl`]: the command set and the retry-based buffer negotiation.

pub mod fuse;
pub mod ioctl;

pub use fuse::{parse_request, CuseInitReply, InHeader, IoctlRequest, Request, WireError};
pub use ioctl::{BufferNeeds, FbCommand, IoVec, IoctlContext, IoctlReply, Phase, RetryRequest};
