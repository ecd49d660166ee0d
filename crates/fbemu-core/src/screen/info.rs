//! Mirrors of `struct fb_fix_screeninfo` and `struct fb_var_screeninfo`.
//!
//! The structs are `#[repr(C)]` so they can be handed directly to the
//! `FBIOGET_*` ioctls of a real framebuffer device.  For the CUSE transport
//! and the `/dev/fb_view` notification device they are converted to and from
//! raw bytes with [`FixScreenInfo::to_bytes`] / [`VarScreenInfo::from_bytes`].
//!
//! # Byte layout
//!
//! The codec writes every field at its `offset_of!` position in native byte
//! order, so the encoded bytes match what the kernel copies to user space on
//! the running architecture.  Padding bytes are always zero.

use std::ffi::c_ulong;
use std::mem::{offset_of, size_of};

use thiserror::Error;

/// Length of the `id` field of the fixed screen info.
pub const FB_ID_LEN: usize = 16;

/// `FB_TYPE_PACKED_PIXELS`
pub const FB_TYPE_PACKED_PIXELS: u32 = 0;
/// `FB_VISUAL_TRUECOLOR`
pub const FB_VISUAL_TRUECOLOR: u32 = 2;
/// `FB_ACCEL_NONE`
pub const FB_ACCEL_NONE: u32 = 0;
/// `FB_ACTIVATE_NOW`
pub const FB_ACTIVATE_NOW: u32 = 0;
/// `FB_VMODE_NONINTERLACED`
pub const FB_VMODE_NONINTERLACED: u32 = 0;

/// Size in bytes of `struct fb_var_screeninfo`.
pub const VAR_SCREENINFO_SIZE: usize = size_of::<VarScreenInfo>();

/// Size in bytes of `struct fb_fix_screeninfo` on this architecture.
pub const FIX_SCREENINFO_SIZE: usize = size_of::<FixScreenInfo>();

const _: () = assert!(VAR_SCREENINFO_SIZE == 160);

/// Error returned when a byte slice cannot be decoded into a screen-info struct.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScreenInfoError {
    #[error("screen info needs {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
}

/// One colour channel of a pixel: `struct fb_bitfield`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bitfield {
    pub offset: u32,
    pub length: u32,
    pub msb_right: u32,
}

impl Bitfield {
    pub const fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            msb_right: 0,
        }
    }
}

/// `struct fb_var_screeninfo`: the mutable part of a framebuffer's geometry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarScreenInfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: Bitfield,
    pub green: Bitfield,
    pub blue: Bitfield,
    pub transp: Bitfield,
    pub nonstd: u32,
    pub activate: u32,
    pub height: u32,
    pub width: u32,
    pub accel_flags: u32,
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

/// `struct fb_fix_screeninfo`: the immutable-per-mode part of the geometry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixScreenInfo {
    pub id: [u8; FB_ID_LEN],
    pub smem_start: c_ulong,
    pub smem_len: u32,
    pub type_: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    pub line_length: u32,
    pub mmio_start: c_ulong,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
}

// ── Byte helpers ──────────────────────────────────────────────────────────────

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

fn put_ulong(buf: &mut [u8], offset: usize, value: c_ulong) {
    let bytes = value.to_ne_bytes();
    buf[offset..offset + bytes.len()].copy_from_slice(&bytes);
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_ne_bytes([buf[offset], buf[offset + 1]])
}

fn get_ulong(buf: &[u8], offset: usize) -> c_ulong {
    let mut bytes = [0u8; size_of::<c_ulong>()];
    bytes.copy_from_slice(&buf[offset..offset + size_of::<c_ulong>()]);
    c_ulong::from_ne_bytes(bytes)
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), ScreenInfoError> {
    if bytes.len() < needed {
        return Err(ScreenInfoError::Truncated {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

fn put_bitfield(buf: &mut [u8], base: usize, field: Bitfield) {
    put_u32(buf, base + offset_of!(Bitfield, offset), field.offset);
    put_u32(buf, base + offset_of!(Bitfield, length), field.length);
    put_u32(buf, base + offset_of!(Bitfield, msb_right), field.msb_right);
}

fn get_bitfield(buf: &[u8], base: usize) -> Bitfield {
    Bitfield {
        offset: get_u32(buf, base + offset_of!(Bitfield, offset)),
        length: get_u32(buf, base + offset_of!(Bitfield, length)),
        msb_right: get_u32(buf, base + offset_of!(Bitfield, msb_right)),
    }
}

// ── VarScreenInfo codec ───────────────────────────────────────────────────────

impl VarScreenInfo {
    /// Channel layout for 32-bit RGBA8888 pixels, as the driver reports it.
    pub fn set_rgba8888(&mut self) {
        self.red = Bitfield::new(0, 8);
        self.green = Bitfield::new(8, 8);
        self.blue = Bitfield::new(16, 8);
        self.transp = Bitfield::new(24, 8);
    }

    fn u32_fields(&self) -> [(usize, u32); 28] {
        [
            (offset_of!(VarScreenInfo, xres), self.xres),
            (offset_of!(VarScreenInfo, yres), self.yres),
            (offset_of!(VarScreenInfo, xres_virtual), self.xres_virtual),
            (offset_of!(VarScreenInfo, yres_virtual), self.yres_virtual),
            (offset_of!(VarScreenInfo, xoffset), self.xoffset),
            (offset_of!(VarScreenInfo, yoffset), self.yoffset),
            (offset_of!(VarScreenInfo, bits_per_pixel), self.bits_per_pixel),
            (offset_of!(VarScreenInfo, grayscale), self.grayscale),
            (offset_of!(VarScreenInfo, nonstd), self.nonstd),
            (offset_of!(VarScreenInfo, activate), self.activate),
            (offset_of!(VarScreenInfo, height), self.height),
            (offset_of!(VarScreenInfo, width), self.width),
            (offset_of!(VarScreenInfo, accel_flags), self.accel_flags),
            (offset_of!(VarScreenInfo, pixclock), self.pixclock),
            (offset_of!(VarScreenInfo, left_margin), self.left_margin),
            (offset_of!(VarScreenInfo, right_margin), self.right_margin),
            (offset_of!(VarScreenInfo, upper_margin), self.upper_margin),
            (offset_of!(VarScreenInfo, lower_margin), self.lower_margin),
            (offset_of!(VarScreenInfo, hsync_len), self.hsync_len),
            (offset_of!(VarScreenInfo, vsync_len), self.vsync_len),
            (offset_of!(VarScreenInfo, sync), self.sync),
            (offset_of!(VarScreenInfo, vmode), self.vmode),
            (offset_of!(VarScreenInfo, rotate), self.rotate),
            (offset_of!(VarScreenInfo, colorspace), self.colorspace),
            (offset_of!(VarScreenInfo, reserved), self.reserved[0]),
            (offset_of!(VarScreenInfo, reserved) + 4, self.reserved[1]),
            (offset_of!(VarScreenInfo, reserved) + 8, self.reserved[2]),
            (offset_of!(VarScreenInfo, reserved) + 12, self.reserved[3]),
        ]
    }

    /// Encodes the struct exactly as the kernel lays it out.
    pub fn to_bytes(&self) -> [u8; VAR_SCREENINFO_SIZE] {
        let mut buf = [0u8; VAR_SCREENINFO_SIZE];
        for (offset, value) in self.u32_fields() {
            put_u32(&mut buf, offset, value);
        }
        put_bitfield(&mut buf, offset_of!(VarScreenInfo, red), self.red);
        put_bitfield(&mut buf, offset_of!(VarScreenInfo, green), self.green);
        put_bitfield(&mut buf, offset_of!(VarScreenInfo, blue), self.blue);
        put_bitfield(&mut buf, offset_of!(VarScreenInfo, transp), self.transp);
        buf
    }

    /// Decodes the first [`VAR_SCREENINFO_SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenInfoError::Truncated`] if fewer bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScreenInfoError> {
        require_len(bytes, VAR_SCREENINFO_SIZE)?;
        let reserved = offset_of!(VarScreenInfo, reserved);
        Ok(Self {
            xres: get_u32(bytes, offset_of!(VarScreenInfo, xres)),
            yres: get_u32(bytes, offset_of!(VarScreenInfo, yres)),
            xres_virtual: get_u32(bytes, offset_of!(VarScreenInfo, xres_virtual)),
            yres_virtual: get_u32(bytes, offset_of!(VarScreenInfo, yres_virtual)),
            xoffset: get_u32(bytes, offset_of!(VarScreenInfo, xoffset)),
            yoffset: get_u32(bytes, offset_of!(VarScreenInfo, yoffset)),
            bits_per_pixel: get_u32(bytes, offset_of!(VarScreenInfo, bits_per_pixel)),
            grayscale: get_u32(bytes, offset_of!(VarScreenInfo, grayscale)),
            red: get_bitfield(bytes, offset_of!(VarScreenInfo, red)),
            green: get_bitfield(bytes, offset_of!(VarScreenInfo, green)),
            blue: get_bitfield(bytes, offset_of!(VarScreenInfo, blue)),
            transp: get_bitfield(bytes, offset_of!(VarScreenInfo, transp)),
            nonstd: get_u32(bytes, offset_of!(VarScreenInfo, nonstd)),
            activate: get_u32(bytes, offset_of!(VarScreenInfo, activate)),
            height: get_u32(bytes, offset_of!(VarScreenInfo, height)),
            width: get_u32(bytes, offset_of!(VarScreenInfo, width)),
            accel_flags: get_u32(bytes, offset_of!(VarScreenInfo, accel_flags)),
            pixclock: get_u32(bytes, offset_of!(VarScreenInfo, pixclock)),
            left_margin: get_u32(bytes, offset_of!(VarScreenInfo, left_margin)),
            right_margin: get_u32(bytes, offset_of!(VarScreenInfo, right_margin)),
            upper_margin: get_u32(bytes, offset_of!(VarScreenInfo, upper_margin)),
            lower_margin: get_u32(bytes, offset_of!(VarScreenInfo, lower_margin)),
            hsync_len: get_u32(bytes, offset_of!(VarScreenInfo, hsync_len)),
            vsync_len: get_u32(bytes, offset_of!(VarScreenInfo, vsync_len)),
            sync: get_u32(bytes, offset_of!(VarScreenInfo, sync)),
            vmode: get_u32(bytes, offset_of!(VarScreenInfo, vmode)),
            rotate: get_u32(bytes, offset_of!(VarScreenInfo, rotate)),
            colorspace: get_u32(bytes, offset_of!(VarScreenInfo, colorspace)),
            reserved: [
                get_u32(bytes, reserved),
                get_u32(bytes, reserved + 4),
                get_u32(bytes, reserved + 8),
                get_u32(bytes, reserved + 12),
            ],
        })
    }
}

// ── FixScreenInfo codec ───────────────────────────────────────────────────────

impl FixScreenInfo {
    /// Returns the identifier up to the first NUL byte.
    pub fn id_str(&self) -> String {
        let end = self.id.iter().position(|&b| b == 0).unwrap_or(FB_ID_LEN);
        String::from_utf8_lossy(&self.id[..end]).into_owned()
    }

    /// Stores `id`, truncated so that a terminating NUL always fits.
    pub fn set_id(&mut self, id: &str) {
        self.id = [0; FB_ID_LEN];
        let bytes = id.as_bytes();
        let len = bytes.len().min(FB_ID_LEN - 1);
        self.id[..len].copy_from_slice(&bytes[..len]);
    }

    /// Encodes the struct exactly as the kernel lays it out on this architecture.
    pub fn to_bytes(&self) -> [u8; FIX_SCREENINFO_SIZE] {
        let mut buf = [0u8; FIX_SCREENINFO_SIZE];
        let id = offset_of!(FixScreenInfo, id);
        buf[id..id + FB_ID_LEN].copy_from_slice(&self.id);
        put_ulong(&mut buf, offset_of!(FixScreenInfo, smem_start), self.smem_start);
        put_u32(&mut buf, offset_of!(FixScreenInfo, smem_len), self.smem_len);
        put_u32(&mut buf, offset_of!(FixScreenInfo, type_), self.type_);
        put_u32(&mut buf, offset_of!(FixScreenInfo, type_aux), self.type_aux);
        put_u32(&mut buf, offset_of!(FixScreenInfo, visual), self.visual);
        put_u16(&mut buf, offset_of!(FixScreenInfo, xpanstep), self.xpanstep);
        put_u16(&mut buf, offset_of!(FixScreenInfo, ypanstep), self.ypanstep);
        put_u16(&mut buf, offset_of!(FixScreenInfo, ywrapstep), self.ywrapstep);
        put_u32(&mut buf, offset_of!(FixScreenInfo, line_length), self.line_length);
        put_ulong(&mut buf, offset_of!(FixScreenInfo, mmio_start), self.mmio_start);
        put_u32(&mut buf, offset_of!(FixScreenInfo, mmio_len), self.mmio_len);
        put_u32(&mut buf, offset_of!(FixScreenInfo, accel), self.accel);
        put_u16(&mut buf, offset_of!(FixScreenInfo, capabilities), self.capabilities);
        let reserved = offset_of!(FixScreenInfo, reserved);
        put_u16(&mut buf, reserved, self.reserved[0]);
        put_u16(&mut buf, reserved + 2, self.reserved[1]);
        buf
    }

    /// Decodes the first [`FIX_SCREENINFO_SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenInfoError::Truncated`] if fewer bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScreenInfoError> {
        require_len(bytes, FIX_SCREENINFO_SIZE)?;
        let mut id = [0u8; FB_ID_LEN];
        let id_off = offset_of!(FixScreenInfo, id);
        id.copy_from_slice(&bytes[id_off..id_off + FB_ID_LEN]);
        let reserved = offset_of!(FixScreenInfo, reserved);
        Ok(Self {
            id,
            smem_start: get_ulong(bytes, offset_of!(FixScreenInfo, smem_start)),
            smem_len: get_u32(bytes, offset_of!(FixScreenInfo, smem_len)),
            type_: get_u32(bytes, offset_of!(FixScreenInfo, type_)),
            type_aux: get_u32(bytes, offset_of!(FixScreenInfo, type_aux)),
            visual: get_u32(bytes, offset_of!(FixScreenInfo, visual)),
            xpanstep: get_u16(bytes, offset_of!(FixScreenInfo, xpanstep)),
            ypanstep: get_u16(bytes, offset_of!(FixScreenInfo, ypanstep)),
            ywrapstep: get_u16(bytes, offset_of!(FixScreenInfo, ywrapstep)),
            line_length: get_u32(bytes, offset_of!(FixScreenInfo, line_length)),
            mmio_start: get_ulong(bytes, offset_of!(FixScreenInfo, mmio_start)),
            mmio_len: get_u32(bytes, offset_of!(FixScreenInfo, mmio_len)),
            accel: get_u32(bytes, offset_of!(FixScreenInfo, accel)),
            capabilities: get_u16(bytes, offset_of!(FixScreenInfo, capabilities)),
            reserved: [get_u16(bytes, reserved), get_u16(bytes, reserved + 2)],
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_screeninfo_is_160_bytes() {
        assert_eq!(VAR_SCREENINFO_SIZE, 160);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_fix_screeninfo_matches_kernel_layout_on_64_bit() {
        assert_eq!(FIX_SCREENINFO_SIZE, 80);
        assert_eq!(offset_of!(FixScreenInfo, smem_start), 16);
        assert_eq!(offset_of!(FixScreenInfo, line_length), 48);
        assert_eq!(offset_of!(FixScreenInfo, mmio_start), 56);
    }

    #[test]
    fn test_var_fields_land_at_kernel_offsets() {
        // Arrange
        let var = VarScreenInfo {
            xres: 480,
            yres: 800,
            yoffset: 800,
            bits_per_pixel: 32,
            ..Default::default()
        };

        // Act
        let bytes = var.to_bytes();

        // Assert
        assert_eq!(get_u32(&bytes, 0), 480);
        assert_eq!(get_u32(&bytes, 4), 800);
        assert_eq!(get_u32(&bytes, 20), 800);
        assert_eq!(get_u32(&bytes, 24), 32);
    }

    #[test]
    fn test_var_rgba_bitfields_survive_decoding() {
        let mut var = VarScreenInfo::default();
        var.set_rgba8888();

        let decoded = VarScreenInfo::from_bytes(&var.to_bytes()).expect("decode");

        assert_eq!(decoded.blue, Bitfield::new(16, 8));
        assert_eq!(decoded.transp, Bitfield::new(24, 8));
    }

    #[test]
    fn test_var_from_short_slice_is_truncated_error() {
        let result = VarScreenInfo::from_bytes(&[0u8; 100]);
        assert_eq!(
            result,
            Err(ScreenInfoError::Truncated {
                needed: 160,
                available: 100
            })
        );
    }

    #[test]
    fn test_fix_id_is_nul_terminated_and_truncated() {
        let mut fix = FixScreenInfo::default();
        fix.set_id("a-very-long-framebuffer-name");
        assert_eq!(fix.id[FB_ID_LEN - 1], 0);
        assert_eq!(fix.id_str(), "a-very-long-fra");
    }

    #[test]
    fn test_fix_line_length_and_id_decode_from_bytes() {
        let mut fix = FixScreenInfo {
            line_length: 1920,
            smem_len: 1920 * 1600,
            visual: FB_VISUAL_TRUECOLOR,
            ..Default::default()
        };
        fix.set_id("emul_fb");

        let decoded = FixScreenInfo::from_bytes(&fix.to_bytes()).expect("decode");

        assert_eq!(decoded, fix);
        assert_eq!(decoded.id_str(), "emul_fb");
    }
}
