//! Visible-window blit.
//!
//! A presentation surface is `xres × yres`; the pixel memory behind it is
//! `xres_virtual × yres_virtual` with a stride of `line_length` bytes.  The
//! pixel shown at `(x, y)` lives at byte offset
//! `(x + xoffset) * 4 + (y + yoffset) * line_length`.

use crate::screen::geometry::ScreenGeometry;

/// Copies the visible window of `src` into `dst`, row by row.
///
/// `dst` is laid out as `yres` rows of `xres` pixels.  Source pixels that
/// fall outside `src` are written as 0, so a short or stale buffer never
/// panics.  Returns the number of destination pixels written.
pub fn copy_visible(src: &[u32], geometry: &ScreenGeometry, dst: &mut [u32]) -> usize {
    let width = geometry.xres() as usize;
    let height = geometry.yres() as usize;
    let stride = geometry.stride_pixels();
    let xoffset = geometry.xoffset() as usize;
    let yoffset = geometry.yoffset() as usize;

    let mut written = 0;
    for (y, row) in dst.chunks_mut(width).take(height).enumerate() {
        let start = (y + yoffset) * stride + xoffset;
        let available = src.len().saturating_sub(start).min(row.len());
        if available > 0 {
            row[..available].copy_from_slice(&src[start..start + available]);
        }
        row[available..].fill(0);
        written += row.len();
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::geometry::DisplayMode;

    fn geometry(xres: u32, yres: u32, xv: u32, yv: u32) -> ScreenGeometry {
        ScreenGeometry::new(
            "fb",
            &DisplayMode {
                xres,
                yres,
                xres_virtual: xv,
                yres_virtual: yv,
                bits_per_pixel: 32,
            },
        )
        .expect("valid geometry")
    }

    #[test]
    fn test_copy_without_offset_is_identity_on_visible_area() {
        // Arrange
        let g = geometry(2, 2, 2, 2);
        let src = [1, 2, 3, 4];
        let mut dst = [0u32; 4];

        // Act
        let written = copy_visible(&src, &g, &mut dst);

        // Assert
        assert_eq!(written, 4);
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_after_pan_shows_second_page() {
        // Arrange: 2x2 visible, 2x4 virtual, second page holds 5..8
        let mut g = geometry(2, 2, 2, 4);
        g.pan(0, 2).expect("pan fits");
        let src = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut dst = [0u32; 4];

        // Act
        copy_visible(&src, &g, &mut dst);

        // Assert
        assert_eq!(dst, [5, 6, 7, 8]);
    }

    #[test]
    fn test_copy_uses_stride_and_horizontal_offset() {
        // 2x2 visible inside a 3x2 virtual buffer, window shifted right by one
        let mut g = geometry(2, 2, 3, 2);
        g.pan(1, 0).expect("pan fits");
        let src = [1, 2, 3, 4, 5, 6];
        let mut dst = [0u32; 4];

        copy_visible(&src, &g, &mut dst);

        assert_eq!(dst, [2, 3, 5, 6]);
    }

    #[test]
    fn test_missing_source_pixels_render_as_zero() {
        let g = geometry(2, 2, 2, 2);
        let src = [9, 9, 9];
        let mut dst = [7u32; 4];

        copy_visible(&src, &g, &mut dst);

        assert_eq!(dst, [9, 9, 9, 0]);
    }
}
