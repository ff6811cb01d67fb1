//! Common types used throughout sprd-pp

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Buffer or extent size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const HD_720P: Self = Self::new(1280, 720);
    pub const FHD_1080P: Self = Self::new(1920, 1080);

    /// Swap width and height (90/270 degree rotation)
    pub const fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Calculate total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w.trim().parse().map_err(|_| format!("bad width '{}'", w))?;
        let height = h.trim().parse().map_err(|_| format!("bad height '{}'", h))?;
        Ok(Self::new(width, height))
    }
}

/// Crop rectangle inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Rectangle covering a whole buffer of `size`
    pub const fn full(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub const fn extent(&self) -> Size {
        Size::new(self.w, self.h)
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Whether this rectangle lies inside a buffer of `size`
    pub fn fits_in(&self, size: Size) -> bool {
        self.x as u64 + self.w as u64 <= size.width as u64
            && self.y as u64 + self.h as u64 <= size.height as u64
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{} {}x{})", self.x, self.y, self.w, self.h)
    }
}

/// Pixel format in the generic fourcc space used by the display manager
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PixelFormat(pub u32);

pub(crate) const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

impl PixelFormat {
    pub const fn from_fourcc(code: &[u8; 4]) -> Self {
        Self(fourcc(code))
    }

    pub const C8: Self = Self::from_fourcc(b"C8  ");
    pub const RGB332: Self = Self::from_fourcc(b"RGB8");
    pub const BGR233: Self = Self::from_fourcc(b"BGR8");
    pub const XRGB4444: Self = Self::from_fourcc(b"XR12");
    pub const XBGR4444: Self = Self::from_fourcc(b"XB12");
    pub const RGBX4444: Self = Self::from_fourcc(b"RX12");
    pub const BGRX4444: Self = Self::from_fourcc(b"BX12");
    pub const ARGB4444: Self = Self::from_fourcc(b"AR12");
    pub const ABGR4444: Self = Self::from_fourcc(b"AB12");
    pub const RGBA4444: Self = Self::from_fourcc(b"RA12");
    pub const BGRA4444: Self = Self::from_fourcc(b"BA12");
    pub const XRGB1555: Self = Self::from_fourcc(b"XR15");
    pub const XBGR1555: Self = Self::from_fourcc(b"XB15");
    pub const RGBX5551: Self = Self::from_fourcc(b"RX15");
    pub const BGRX5551: Self = Self::from_fourcc(b"BX15");
    pub const ARGB1555: Self = Self::from_fourcc(b"AR15");
    pub const ABGR1555: Self = Self::from_fourcc(b"AB15");
    pub const RGBA5551: Self = Self::from_fourcc(b"RA15");
    pub const BGRA5551: Self = Self::from_fourcc(b"BA15");
    pub const RGB565: Self = Self::from_fourcc(b"RG16");
    pub const BGR565: Self = Self::from_fourcc(b"BG16");
    pub const RGB888: Self = Self::from_fourcc(b"RG24");
    pub const BGR888: Self = Self::from_fourcc(b"BG24");
    pub const XRGB8888: Self = Self::from_fourcc(b"XR24");
    pub const XBGR8888: Self = Self::from_fourcc(b"XB24");
    pub const RGBX8888: Self = Self::from_fourcc(b"RX24");
    pub const BGRX8888: Self = Self::from_fourcc(b"BX24");
    pub const ARGB8888: Self = Self::from_fourcc(b"AR24");
    pub const ABGR8888: Self = Self::from_fourcc(b"AB24");
    pub const RGBA8888: Self = Self::from_fourcc(b"RA24");
    pub const BGRA8888: Self = Self::from_fourcc(b"BA24");
    pub const XRGB2101010: Self = Self::from_fourcc(b"XR30");
    pub const XBGR2101010: Self = Self::from_fourcc(b"XB30");
    pub const RGBX1010102: Self = Self::from_fourcc(b"RX30");
    pub const BGRX1010102: Self = Self::from_fourcc(b"BX30");
    pub const ARGB2101010: Self = Self::from_fourcc(b"AR30");
    pub const ABGR2101010: Self = Self::from_fourcc(b"AB30");
    pub const RGBA1010102: Self = Self::from_fourcc(b"RA30");
    pub const BGRA1010102: Self = Self::from_fourcc(b"BA30");
    pub const YUYV: Self = Self::from_fourcc(b"YUYV");
    pub const YVYU: Self = Self::from_fourcc(b"YVYU");
    pub const UYVY: Self = Self::from_fourcc(b"UYVY");
    pub const VYUY: Self = Self::from_fourcc(b"VYUY");
    pub const AYUV: Self = Self::from_fourcc(b"AYUV");
    pub const NV12: Self = Self::from_fourcc(b"NV12");
    pub const NV21: Self = Self::from_fourcc(b"NV21");
    pub const NV16: Self = Self::from_fourcc(b"NV16");
    pub const NV61: Self = Self::from_fourcc(b"NV61");
    pub const YUV410: Self = Self::from_fourcc(b"YUV9");
    pub const YVU410: Self = Self::from_fourcc(b"YVU9");
    pub const YUV411: Self = Self::from_fourcc(b"YU11");
    pub const YVU411: Self = Self::from_fourcc(b"YV11");
    pub const YUV420: Self = Self::from_fourcc(b"YU12");
    pub const YVU420: Self = Self::from_fourcc(b"YV12");
    pub const YUV422: Self = Self::from_fourcc(b"YU16");
    pub const YVU422: Self = Self::from_fourcc(b"YV16");
    pub const YUV444: Self = Self::from_fourcc(b"YU24");
    pub const YVU444: Self = Self::from_fourcc(b"YV24");
    /// NV12 with 64x32 macroblock tiling
    pub const NV12MT: Self = Self::from_fourcc(b"TM12");

    /// Zero is never a valid format; translators use it as "not found"
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn is_rgb(&self) -> bool {
        matches!(
            *self,
            PixelFormat::XRGB8888
                | PixelFormat::ARGB8888
                | PixelFormat::XBGR8888
                | PixelFormat::ABGR8888
        )
    }

    /// Memory layout used when allocating a buffer of this format
    pub fn layout(&self) -> Option<FormatLayout> {
        let layout = match *self {
            PixelFormat::XRGB8888
            | PixelFormat::ARGB8888
            | PixelFormat::XBGR8888
            | PixelFormat::ABGR8888
            | PixelFormat::RGBX8888
            | PixelFormat::BGRX8888
            | PixelFormat::RGBA8888
            | PixelFormat::BGRA8888 => FormatLayout::packed(32),
            PixelFormat::RGB888 | PixelFormat::BGR888 => FormatLayout::packed(24),
            PixelFormat::RGB565
            | PixelFormat::BGR565
            | PixelFormat::YUYV
            | PixelFormat::YVYU
            | PixelFormat::UYVY
            | PixelFormat::VYUY => FormatLayout::packed(16),
            PixelFormat::NV12 | PixelFormat::NV21 | PixelFormat::NV12MT => FormatLayout {
                bpp: 8,
                planes: 2,
                h_sub: 2,
                v_sub: 2,
            },
            PixelFormat::NV16 | PixelFormat::NV61 => FormatLayout {
                bpp: 8,
                planes: 2,
                h_sub: 2,
                v_sub: 1,
            },
            PixelFormat::YUV420 | PixelFormat::YVU420 => FormatLayout {
                bpp: 8,
                planes: 3,
                h_sub: 2,
                v_sub: 2,
            },
            PixelFormat::YUV422 | PixelFormat::YVU422 => FormatLayout {
                bpp: 8,
                planes: 3,
                h_sub: 2,
                v_sub: 1,
            },
            PixelFormat::YUV444 | PixelFormat::YVU444 => FormatLayout {
                bpp: 8,
                planes: 3,
                h_sub: 1,
                v_sub: 1,
            },
            _ => return None,
        };
        Some(layout)
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelFormat({})", self)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in bytes {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let named = match s.to_ascii_uppercase().as_str() {
            "XRGB8888" => Some(PixelFormat::XRGB8888),
            "ARGB8888" => Some(PixelFormat::ARGB8888),
            "RGB565" => Some(PixelFormat::RGB565),
            "NV12" => Some(PixelFormat::NV12),
            "NV21" => Some(PixelFormat::NV21),
            "YUYV" => Some(PixelFormat::YUYV),
            "UYVY" => Some(PixelFormat::UYVY),
            "YUV420" => Some(PixelFormat::YUV420),
            "YVU420" => Some(PixelFormat::YVU420),
            "YUV444" => Some(PixelFormat::YUV444),
            _ => None,
        };
        if let Some(format) = named {
            return Ok(format);
        }

        // Fall back to a raw fourcc such as "XR24"
        let raw = s.as_bytes();
        if raw.len() == 4 {
            Ok(PixelFormat::from_fourcc(&[raw[0], raw[1], raw[2], raw[3]]))
        } else {
            Err(format!("unknown pixel format '{}'", s))
        }
    }
}

/// Plane layout of a pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatLayout {
    /// Bits per pixel of the first plane
    pub bpp: u32,
    /// Number of image planes
    pub planes: u32,
    /// Horizontal chroma subsampling
    pub h_sub: u32,
    /// Vertical chroma subsampling
    pub v_sub: u32,
}

impl FormatLayout {
    const fn packed(bpp: u32) -> Self {
        Self {
            bpp,
            planes: 1,
            h_sub: 1,
            v_sub: 1,
        }
    }

    /// Rows of `bpp`-wide pixels needed to hold all planes of a `size` image
    pub fn total_rows(&self, size: Size) -> u32 {
        let chroma_rows = size.height.div_ceil(self.v_sub);
        match self.planes {
            1 => size.height,
            // Interleaved chroma plane: full width, subsampled height
            2 => size.height + chroma_rows * 2 / self.h_sub,
            // Two chroma planes each of subsampled width and height
            _ => size.height + 2 * chroma_rows / self.h_sub,
        }
    }
}

/// Rotation/flip transform applied during a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Transform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    /// Decode the display manager's numeric transform
    pub fn from_raw(value: u32) -> Option<Self> {
        let t = match value {
            0 => Transform::Normal,
            1 => Transform::Rotate90,
            2 => Transform::Rotate180,
            3 => Transform::Rotate270,
            4 => Transform::Flipped,
            5 => Transform::Flipped90,
            6 => Transform::Flipped180,
            7 => Transform::Flipped270,
            _ => return None,
        };
        Some(t)
    }

    pub fn raw(&self) -> u32 {
        *self as u32
    }

    /// Quarter turns clockwise (0..=3)
    pub fn quarter_turns(&self) -> u32 {
        self.raw() % 4
    }

    pub fn is_flipped(&self) -> bool {
        self.raw() >= 4
    }

    /// 90 and 270 degree rotations exchange the width and height axes
    pub fn swaps_axes(&self) -> bool {
        self.quarter_turns() % 2 == 1
    }
}

/// Format, size and crop of one side of a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub format: PixelFormat,
    pub size: Size,
    pub crop: Rect,
}

impl BufferConfig {
    /// Buffer whose crop covers the whole image
    pub fn full(format: PixelFormat, size: Size) -> Self {
        Self {
            format,
            size,
            crop: Rect::full(size),
        }
    }

    pub fn with_crop(mut self, crop: Rect) -> Self {
        self.crop = crop;
        self
    }
}

impl fmt::Display for BufferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} crop{}", self.format, self.size, self.crop)
    }
}

/// A requested source -> destination conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSpec {
    pub src: BufferConfig,
    pub dst: BufferConfig,
    pub transform: Transform,
    /// Blocking completion; this hardware only completes through events
    pub sync: bool,
}

impl ConversionSpec {
    pub fn new(src: BufferConfig, dst: BufferConfig) -> Self {
        Self {
            src,
            dst,
            transform: Transform::Normal,
            sync: false,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_display() {
        assert_eq!(PixelFormat::NV12.to_string(), "NV12");
        assert_eq!(PixelFormat::XRGB8888.to_string(), "XR24");
        assert_eq!(PixelFormat(0).to_string(), "0x00000000");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("nv12".parse::<PixelFormat>(), Ok(PixelFormat::NV12));
        assert_eq!("XR24".parse::<PixelFormat>(), Ok(PixelFormat::XRGB8888));
        assert!("RGBA".parse::<PixelFormat>().is_ok());
        assert!("bogus-format".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_size_parse() {
        assert_eq!("1920x1080".parse::<Size>(), Ok(Size::FHD_1080P));
        assert!("1920".parse::<Size>().is_err());
    }

    #[test]
    fn test_transform_axes() {
        assert!(!Transform::Normal.swaps_axes());
        assert!(Transform::Rotate90.swaps_axes());
        assert!(Transform::Flipped270.swaps_axes());
        assert!(Transform::Flipped.is_flipped());
        assert_eq!(Transform::Flipped180.quarter_turns(), 2);
        assert_eq!(Transform::from_raw(8), None);
    }

    #[test]
    fn test_rect_fits() {
        let size = Size::new(100, 50);
        assert!(Rect::full(size).fits_in(size));
        assert!(!Rect::new(10, 0, 100, 50).fits_in(size));
    }

    #[test]
    fn test_layout_rows() {
        let nv12 = PixelFormat::NV12.layout().unwrap();
        assert_eq!(nv12.total_rows(Size::new(64, 64)), 96);
        let yuv420 = PixelFormat::YUV420.layout().unwrap();
        assert_eq!(yuv420.total_rows(Size::new(64, 64)), 96);
        let yuv444 = PixelFormat::YUV444.layout().unwrap();
        assert_eq!(yuv444.total_rows(Size::new(64, 64)), 192);
        let xrgb = PixelFormat::XRGB8888.layout().unwrap();
        assert_eq!(xrgb.total_rows(Size::new(64, 64)), 64);
    }
}
