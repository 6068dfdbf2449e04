//! Pixel formats and per-plane geometry.
//!
//! A [`BufferFormat`] pairs the four-character chroma code the native engine
//! understands with a [`PlaneLayout`] describing how a frame is split into
//! planes. Given the decoded width and height it derives a [`FrameLayout`]:
//! one pitch (bytes per row, padded to [`ROW_ALIGNMENT`]) and one line count
//! per plane.
//!
//! ```
//! use planeport_core::format::BufferFormat;
//!
//! let layout = BufferFormat::nv12().layout(64, 48).unwrap();
//! assert_eq!(layout.pitches(), &[64, 64]);
//! assert_eq!(layout.lines(), &[48, 24]);
//! assert_eq!(layout.plane_size(1), Some(64 * 24));
//! ```

use crate::error::SurfaceError;

/// Row padding applied to every plane pitch, in bytes.
pub const ROW_ALIGNMENT: u32 = 32;

/// Size of the engine's per-call pitch/line descriptor arrays.
pub const MAX_PLANES: usize = 5;

/// Four-character chroma code, truncated to at most 4 bytes.
///
/// Shorter codes keep their length: the engine descriptor receives only the
/// significant bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chroma {
    bytes: [u8; 4],
    len: u8,
}

impl Chroma {
    /// Creates a chroma code from a string, keeping at most the first 4 bytes.
    pub fn new(code: &str) -> Self {
        Self::from_bytes(code.as_bytes())
    }

    /// Creates a chroma code from raw bytes, keeping at most the first 4.
    pub fn from_bytes(code: &[u8]) -> Self {
        let len = code.len().min(4);
        let mut bytes = [0u8; 4];
        bytes[..len].copy_from_slice(&code[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// The significant bytes of the code.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for Chroma {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Chroma({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl std::fmt::Display for Chroma {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// How a frame is split into planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneLayout {
    /// Single interleaved plane (RGB variants, YUY2/UYVY)
    Packed {
        /// Bytes per pixel in the single plane
        bytes_per_pixel: u32,
    },
    /// Y + U + V, chroma subsampled 2x2 (I420, YV12)
    Planar420,
    /// Y + interleaved UV, chroma subsampled 2x2 (NV12)
    SemiPlanar420,
}

impl PlaneLayout {
    /// Returns the number of planes for this layout.
    pub fn num_planes(&self) -> usize {
        match self {
            PlaneLayout::Packed { .. } => 1,
            PlaneLayout::Planar420 => 3,
            PlaneLayout::SemiPlanar420 => 2,
        }
    }

    /// Returns true if chroma is stored separately from luma.
    pub fn is_yuv_planar(&self) -> bool {
        !matches!(self, PlaneLayout::Packed { .. })
    }
}

/// The format the surface asks the engine to decode into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFormat {
    chroma: Chroma,
    layout: PlaneLayout,
}

impl BufferFormat {
    /// Pairs an arbitrary chroma code with a plane layout.
    pub fn new(chroma: Chroma, layout: PlaneLayout) -> Self {
        Self { chroma, layout }
    }

    /// 32-bit RGB, one plane.
    pub fn rv32() -> Self {
        Self::new(Chroma::new("RV32"), PlaneLayout::Packed { bytes_per_pixel: 4 })
    }

    /// 24-bit RGB, one plane.
    pub fn rv24() -> Self {
        Self::new(Chroma::new("RV24"), PlaneLayout::Packed { bytes_per_pixel: 3 })
    }

    pub fn rgba() -> Self {
        Self::new(Chroma::new("RGBA"), PlaneLayout::Packed { bytes_per_pixel: 4 })
    }

    pub fn bgra() -> Self {
        Self::new(Chroma::new("BGRA"), PlaneLayout::Packed { bytes_per_pixel: 4 })
    }

    /// Packed 4:2:2, Y0 U Y1 V.
    pub fn yuy2() -> Self {
        Self::new(Chroma::new("YUY2"), PlaneLayout::Packed { bytes_per_pixel: 2 })
    }

    /// Packed 4:2:2, U Y0 V Y1.
    pub fn uyvy() -> Self {
        Self::new(Chroma::new("UYVY"), PlaneLayout::Packed { bytes_per_pixel: 2 })
    }

    /// Planar 4:2:0, Y then U then V.
    pub fn i420() -> Self {
        Self::new(Chroma::new("I420"), PlaneLayout::Planar420)
    }

    /// Planar 4:2:0, Y then V then U.
    pub fn yv12() -> Self {
        Self::new(Chroma::new("YV12"), PlaneLayout::Planar420)
    }

    /// Semi-planar 4:2:0, Y then interleaved UV.
    pub fn nv12() -> Self {
        Self::new(Chroma::new("NV12"), PlaneLayout::SemiPlanar420)
    }

    /// Looks up a built-in format by chroma code (case-insensitive).
    pub fn from_chroma(code: &str) -> Option<Self> {
        let format = match code.to_ascii_uppercase().as_str() {
            "RV32" => Self::rv32(),
            "RV24" => Self::rv24(),
            "RGBA" => Self::rgba(),
            "BGRA" => Self::bgra(),
            "YUY2" => Self::yuy2(),
            "UYVY" => Self::uyvy(),
            "I420" => Self::i420(),
            "YV12" => Self::yv12(),
            "NV12" => Self::nv12(),
            _ => return None,
        };
        Some(format)
    }

    pub fn chroma(&self) -> Chroma {
        self.chroma
    }

    pub fn plane_layout(&self) -> PlaneLayout {
        self.layout
    }

    /// Computes per-plane pitches and line counts for a decoded frame size.
    pub fn layout(&self, width: u32, height: u32) -> Result<FrameLayout, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidFormat(format!(
                "{}: empty frame {width}x{height}",
                self.chroma
            )));
        }

        let overflow = || {
            SurfaceError::InvalidFormat(format!(
                "{}: {width}x{height} overflows plane geometry",
                self.chroma
            ))
        };
        let chroma_width = width.div_ceil(2);
        let chroma_lines = height.div_ceil(2);

        let (pitches, lines) = match self.layout {
            PlaneLayout::Packed { bytes_per_pixel } => {
                let row = width.checked_mul(bytes_per_pixel).ok_or_else(overflow)?;
                (vec![align_row(row).ok_or_else(overflow)?], vec![height])
            }
            PlaneLayout::Planar420 => {
                let luma = align_row(width).ok_or_else(overflow)?;
                let chroma = align_row(chroma_width).ok_or_else(overflow)?;
                (
                    vec![luma, chroma, chroma],
                    vec![height, chroma_lines, chroma_lines],
                )
            }
            PlaneLayout::SemiPlanar420 => {
                let luma = align_row(width).ok_or_else(overflow)?;
                let uv_row = chroma_width.checked_mul(2).ok_or_else(overflow)?;
                let chroma = align_row(uv_row).ok_or_else(overflow)?;
                (vec![luma, chroma], vec![height, chroma_lines])
            }
        };

        let layout = FrameLayout { pitches, lines };
        if layout.total_size().is_none() {
            return Err(overflow());
        }
        Ok(layout)
    }
}

impl Default for BufferFormat {
    fn default() -> Self {
        Self::rv32()
    }
}

fn align_row(bytes: u32) -> Option<u32> {
    bytes.checked_next_multiple_of(ROW_ALIGNMENT)
}

/// Per-plane geometry for one negotiated frame size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pitches: Vec<u32>,
    lines: Vec<u32>,
}

impl FrameLayout {
    /// Builds a layout from explicit arrays.
    ///
    /// Both arrays must have the same length, between 1 and [`MAX_PLANES`].
    pub fn from_parts(pitches: Vec<u32>, lines: Vec<u32>) -> Result<Self, SurfaceError> {
        if pitches.len() != lines.len() || pitches.is_empty() || pitches.len() > MAX_PLANES {
            return Err(SurfaceError::InvalidFormat(format!(
                "{} pitches for {} line counts",
                pitches.len(),
                lines.len()
            )));
        }
        Ok(Self { pitches, lines })
    }

    pub fn plane_count(&self) -> usize {
        self.pitches.len()
    }

    pub fn pitches(&self) -> &[u32] {
        &self.pitches
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    /// Exact byte size of a plane: `pitch * lines`.
    pub fn plane_size(&self, plane: usize) -> Option<usize> {
        let pitch = *self.pitches.get(plane)? as usize;
        let lines = *self.lines.get(plane)? as usize;
        pitch.checked_mul(lines)
    }

    /// Sum of every plane size, or `None` on overflow.
    pub fn total_size(&self) -> Option<usize> {
        (0..self.plane_count()).try_fold(0usize, |acc, i| acc.checked_add(self.plane_size(i)?))
    }
}

/// The format in effect after a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub format: BufferFormat,
    /// Width reported by the engine, in pixels
    pub width: u32,
    /// Height reported by the engine, in pixels
    pub height: u32,
    pub layout: FrameLayout,
}
