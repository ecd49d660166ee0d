//! Screen description and the visible-window arithmetic.
//!
//! - [`info`]: byte-exact mirrors of the kernel's screen-info structs.
//! - [`geometry`]: the validated [`geometry::ScreenGeometry`] every other
//!   component works from.
//! - [`view`]: copies the visible window of a virtual buffer into a
//!   presentation-sized frame.

pub mod geometry;
pub mod info;
pub mod view;

pub use geometry::{DisplayMode, GeometryError, ScreenGeometry, BYTES_PER_PIXEL, SUPPORTED_DEPTH};
pub use info::{Bitfield, FixScreenInfo, ScreenInfoError, VarScreenInfo};
pub use view::copy_visible;
