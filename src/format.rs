//! Pixel format translation
//!
//! Maps the display manager's generic fourcc space onto the two encodings
//! the SPRD display stack understands: DRM fourcc codes for the KMS/IPP path
//! and `SPRD_DATA_FORMAT_*` codes for the legacy framebuffer overlay path.

use crate::error::{Error, Result};
use crate::types::{fourcc, PixelFormat};

/// Legacy framebuffer overlay format codes
pub mod fb {
    pub const SPRD_DATA_FORMAT_YUV422: u32 = 0;
    pub const SPRD_DATA_FORMAT_YUV420: u32 = 1;
    pub const SPRD_DATA_FORMAT_YUV400: u32 = 2;
    pub const SPRD_DATA_FORMAT_RGB888: u32 = 3;
    pub const SPRD_DATA_FORMAT_RGB666: u32 = 4;
    pub const SPRD_DATA_FORMAT_RGB565: u32 = 5;
    pub const SPRD_DATA_FORMAT_RGB555: u32 = 6;
}

type FormatEntry = (PixelFormat, u32);

const fn drm(format: PixelFormat, code: &[u8; 4]) -> FormatEntry {
    (format, fourcc(code))
}

static DRM_FORMATS: [FormatEntry; 59] = [
    drm(PixelFormat::C8, b"C8  "),
    drm(PixelFormat::RGB332, b"RGB8"),
    drm(PixelFormat::BGR233, b"BGR8"),
    drm(PixelFormat::XRGB4444, b"XR12"),
    drm(PixelFormat::XBGR4444, b"XB12"),
    drm(PixelFormat::RGBX4444, b"RX12"),
    drm(PixelFormat::BGRX4444, b"BX12"),
    drm(PixelFormat::ARGB4444, b"AR12"),
    drm(PixelFormat::ABGR4444, b"AB12"),
    drm(PixelFormat::RGBA4444, b"RA12"),
    drm(PixelFormat::BGRA4444, b"BA12"),
    drm(PixelFormat::XRGB1555, b"XR15"),
    drm(PixelFormat::XBGR1555, b"XB15"),
    drm(PixelFormat::RGBX5551, b"RX15"),
    drm(PixelFormat::BGRX5551, b"BX15"),
    drm(PixelFormat::ARGB1555, b"AR15"),
    drm(PixelFormat::ABGR1555, b"AB15"),
    drm(PixelFormat::RGBA5551, b"RA15"),
    drm(PixelFormat::BGRA5551, b"BA15"),
    drm(PixelFormat::RGB565, b"RG16"),
    drm(PixelFormat::BGR565, b"BG16"),
    drm(PixelFormat::RGB888, b"RG24"),
    drm(PixelFormat::BGR888, b"BG24"),
    drm(PixelFormat::XRGB8888, b"XR24"),
    drm(PixelFormat::XBGR8888, b"XB24"),
    drm(PixelFormat::RGBX8888, b"RX24"),
    drm(PixelFormat::BGRX8888, b"BX24"),
    drm(PixelFormat::ARGB8888, b"AR24"),
    drm(PixelFormat::ABGR8888, b"AB24"),
    drm(PixelFormat::RGBA8888, b"RA24"),
    drm(PixelFormat::BGRA8888, b"BA24"),
    drm(PixelFormat::XRGB2101010, b"XR30"),
    drm(PixelFormat::XBGR2101010, b"XB30"),
    drm(PixelFormat::RGBX1010102, b"RX30"),
    drm(PixelFormat::BGRX1010102, b"BX30"),
    drm(PixelFormat::ARGB2101010, b"AR30"),
    drm(PixelFormat::ABGR2101010, b"AB30"),
    drm(PixelFormat::RGBA1010102, b"RA30"),
    drm(PixelFormat::BGRA1010102, b"BA30"),
    drm(PixelFormat::YUYV, b"YUYV"),
    drm(PixelFormat::YVYU, b"YVYU"),
    drm(PixelFormat::UYVY, b"UYVY"),
    drm(PixelFormat::VYUY, b"VYUY"),
    drm(PixelFormat::AYUV, b"AYUV"),
    drm(PixelFormat::NV12, b"NV12"),
    drm(PixelFormat::NV21, b"NV21"),
    drm(PixelFormat::NV16, b"NV16"),
    drm(PixelFormat::NV61, b"NV61"),
    drm(PixelFormat::YUV410, b"YUV9"),
    drm(PixelFormat::YVU410, b"YVU9"),
    drm(PixelFormat::YUV411, b"YU11"),
    drm(PixelFormat::YVU411, b"YV11"),
    drm(PixelFormat::YUV420, b"YU12"),
    drm(PixelFormat::YVU420, b"YV12"),
    drm(PixelFormat::YUV422, b"YU16"),
    drm(PixelFormat::YVU422, b"YV16"),
    drm(PixelFormat::YUV444, b"YU24"),
    drm(PixelFormat::YVU444, b"YV24"),
    drm(PixelFormat::NV12MT, b"TM12"),
];

static FB_FORMATS: [FormatEntry; 5] = [
    (PixelFormat::RGB565, fb::SPRD_DATA_FORMAT_RGB565),
    (PixelFormat::XRGB8888, fb::SPRD_DATA_FORMAT_RGB888),
    (PixelFormat::YUV410, fb::SPRD_DATA_FORMAT_YUV400),
    (PixelFormat::YUV420, fb::SPRD_DATA_FORMAT_YUV420),
    (PixelFormat::YUV422, fb::SPRD_DATA_FORMAT_YUV422),
];

fn lookup_hw(table: &[FormatEntry], format: PixelFormat) -> Option<u32> {
    table.iter().find(|(f, _)| *f == format).map(|(_, code)| *code)
}

fn lookup_generic(table: &[FormatEntry], code: u32) -> Option<PixelFormat> {
    table.iter().find(|(_, c)| *c == code).map(|(f, _)| *f)
}

/// Generic format -> DRM fourcc
pub fn to_drm(format: PixelFormat) -> Option<u32> {
    let code = lookup_hw(&DRM_FORMATS, format);
    if code.is_none() {
        tracing::error!("format '{}' has no DRM code", format);
    }
    code
}

/// DRM fourcc -> generic format
pub fn from_drm(code: u32) -> Option<PixelFormat> {
    let format = lookup_generic(&DRM_FORMATS, code);
    if format.is_none() {
        tracing::error!("DRM format '{}' not found", PixelFormat(code));
    }
    format
}

/// Generic format -> legacy framebuffer overlay code
pub fn to_fb(format: PixelFormat) -> Option<u32> {
    let code = lookup_hw(&FB_FORMATS, format);
    if code.is_none() {
        tracing::error!("format '{}' has no framebuffer code", format);
    }
    code
}

/// Legacy framebuffer overlay code -> generic format
pub fn from_fb(code: u32) -> Option<PixelFormat> {
    let format = lookup_generic(&FB_FORMATS, code);
    if format.is_none() {
        tracing::error!("framebuffer format '{}' not found", code);
    }
    format
}

/// DRM fourcc for a format that must be programmed into the hardware
pub fn drm_code(format: PixelFormat) -> Result<u32> {
    to_drm(format).ok_or(Error::UnknownFormat(format))
}

/// Every (generic, DRM) pair known to the translator
pub fn drm_table() -> &'static [(PixelFormat, u32)] {
    &DRM_FORMATS
}

/// Every (generic, framebuffer) pair known to the translator
pub fn fb_table() -> &'static [(PixelFormat, u32)] {
    &FB_FORMATS
}
