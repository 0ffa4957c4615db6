//! Raw picture types shared by sources, the fan-out and the resampler.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::DecodeError;

// ── FrameSize ────────────────────────────────────────────────────

/// Width and height of a picture in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Native resolution of the mirrored Android device.
pub type AndroidSize = FrameSize;

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `true` when either dimension is zero (size unknown or invalid).
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels.
    pub const fn area(self) -> usize {
        self.width as usize * self.height as usize
    }

    const fn pack(self) -> u64 {
        ((self.width as u64) << 32) | self.height as u64
    }

    const fn unpack(v: u64) -> Self {
        Self {
            width: (v >> 32) as u32,
            height: v as u32,
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── FrameSizeCell ────────────────────────────────────────────────

/// Lock-free holder for the *current* source frame size.
///
/// Live sources may learn their size only after start, and may change it on
/// rotation, so readers always load the latest value instead of caching.
#[derive(Debug, Default)]
pub struct FrameSizeCell(AtomicU64);

impl FrameSizeCell {
    pub fn new(size: Option<FrameSize>) -> Self {
        Self(AtomicU64::new(size.map_or(0, FrameSize::pack)))
    }

    /// The current size, or `None` while unknown.
    pub fn get(&self) -> Option<FrameSize> {
        let size = FrameSize::unpack(self.0.load(Ordering::Acquire));
        (!size.is_empty()).then_some(size)
    }

    /// Publish a new size. Returns `true` if the value changed.
    pub fn set(&self, size: FrameSize) -> bool {
        self.0.swap(size.pack(), Ordering::AcqRel) != size.pack()
    }
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling (decoder default).
    Yuv420p,
    /// Y plane followed by an interleaved UV plane, 2x2 subsampled.
    Nv12,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb24,
    /// 3 bytes per pixel: Blue, Green, Red. The display format.
    Bgr24,
}

impl PixelFormat {
    /// The fixed format every viewer receives.
    pub const DISPLAY: PixelFormat = PixelFormat::Bgr24;

    /// Number of planes a frame of this format carries.
    pub const fn plane_count(self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            PixelFormat::Nv12 => 2,
            _ => 1,
        }
    }

    /// Bytes per pixel for packed formats, `None` for planar ones.
    pub const fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => Some(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuv420p | PixelFormat::Nv12 => None,
        }
    }

    /// Minimum (row bytes, rows) of `plane` for a picture of `size`.
    pub fn plane_extent(self, plane: usize, size: FrameSize) -> (usize, usize) {
        let (w, h) = (size.width as usize, size.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        match (self, plane) {
            (PixelFormat::Yuv420p | PixelFormat::Nv12, 0) => (w, h),
            (PixelFormat::Yuv420p, _) => (cw, ch),
            (PixelFormat::Nv12, _) => (cw * 2, ch),
            (packed, _) => (w * packed.bytes_per_pixel().unwrap_or(1), h),
        }
    }

    /// Map an FFmpeg pixel format name onto a supported layout.
    pub fn from_ffmpeg_name(name: &str) -> Option<Self> {
        match name {
            "yuv420p" | "yuvj420p" => Some(PixelFormat::Yuv420p),
            "nv12" => Some(PixelFormat::Nv12),
            "bgra" => Some(PixelFormat::Bgra8),
            "rgba" => Some(PixelFormat::Rgba8),
            "rgb24" => Some(PixelFormat::Rgb24),
            "bgr24" => Some(PixelFormat::Bgr24),
            _ => None,
        }
    }
}

// ── Plane ────────────────────────────────────────────────────────

/// One plane of pixel data: rows of `stride` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Row pitch in bytes (may exceed the visible row width).
    pub stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Bytes needed for `rows` rows whose visible part is `row_bytes` wide.
    /// `None` if the size does not fit in `usize`.
    pub fn required_len(&self, row_bytes: usize, rows: usize) -> Option<usize> {
        self.stride
            .checked_mul(rows.saturating_sub(1))?
            .checked_add(row_bytes)
    }

    /// Copy `rows` rows of `row_bytes` from a padded source buffer.
    pub fn copy_from(src: &[u8], src_stride: usize, row_bytes: usize, rows: usize) -> Self {
        let mut data = Vec::with_capacity(row_bytes * rows);
        for r in 0..rows {
            let start = r * src_stride;
            let end = (start + row_bytes).min(src.len());
            if start >= end {
                break;
            }
            data.extend_from_slice(&src[start..end]);
        }
        Self {
            data,
            stride: row_bytes,
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// A decoded picture. Immutable once built.
#[derive(Debug, Clone)]
pub struct Frame {
    planes: Vec<Plane>,
    size: FrameSize,
    format: PixelFormat,
    /// Position in production order (0-based).
    index: u64,
    /// Presentation timestamp relative to the start of the stream, if known.
    pts: Option<Duration>,
}

impl Frame {
    /// Build a frame, checking that the planes can hold a picture of `size`.
    pub fn new(
        planes: Vec<Plane>,
        size: FrameSize,
        format: PixelFormat,
        index: u64,
    ) -> Result<Self, DecodeError> {
        if size.is_empty() {
            return Err(DecodeError::InvalidFrame(format!("empty frame size {size}")));
        }
        if planes.len() != format.plane_count() {
            return Err(DecodeError::InvalidFrame(format!(
                "{format:?} needs {} planes, got {}",
                format.plane_count(),
                planes.len()
            )));
        }
        for (i, plane) in planes.iter().enumerate() {
            let (row_bytes, rows) = format.plane_extent(i, size);
            if plane.stride < row_bytes {
                return Err(DecodeError::InvalidFrame(format!(
                    "plane {i} stride {} < row width {row_bytes}",
                    plane.stride
                )));
            }
            let Some(needed) = plane.required_len(row_bytes, rows) else {
                return Err(DecodeError::InvalidFrame(format!(
                    "plane {i} stride {} overflows the address space",
                    plane.stride
                )));
            };
            if plane.data.len() < needed {
                return Err(DecodeError::InvalidFrame(format!(
                    "plane {i} holds {} bytes, needs {needed}",
                    plane.data.len()
                )));
            }
        }
        Ok(Self {
            planes,
            size,
            format,
            index,
            pts: None,
        })
    }

    /// Build a frame without checking the plane layout.
    ///
    /// For pipelines that hand over pictures they already trust; the
    /// resampler still bounds-checks every plane before reading it.
    pub fn from_parts(planes: Vec<Plane>, size: FrameSize, format: PixelFormat, index: u64) -> Self {
        Self {
            planes,
            size,
            format,
            index,
            pts: None,
        }
    }

    /// Attach a presentation timestamp.
    pub fn with_pts(mut self, pts: Option<Duration>) -> Self {
        self.pts = pts;
        self
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn pts(&self) -> Option<Duration> {
        self.pts
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, i: usize) -> Option<&Plane> {
        self.planes.get(i)
    }
}

/// Mid-grey-chroma YUV 4:2:0 frame with a flat luma value.
#[cfg(test)]
pub(crate) fn test_yuv_frame(w: u32, h: u32, y: u8, index: u64) -> Frame {
    let size = FrameSize::new(w, h);
    let (cw, ch) = ((w as usize).div_ceil(2), (h as usize).div_ceil(2));
    Frame::new(
        vec![
            Plane::new(vec![y; size.area()], w as usize),
            Plane::new(vec![128; cw * ch], cw),
            Plane::new(vec![128; cw * ch], cw),
        ],
        size,
        PixelFormat::Yuv420p,
        index,
    )
    .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_cell_starts_unknown() {
        let cell = FrameSizeCell::default();
        assert_eq!(cell.get(), None);
        assert!(cell.set(FrameSize::new(1080, 2280)));
        assert_eq!(cell.get(), Some(FrameSize::new(1080, 2280)));
        assert!(!cell.set(FrameSize::new(1080, 2280)));
    }

    #[test]
    fn yuv_frame_validates() {
        let frame = test_yuv_frame(5, 3, 16, 0);
        assert_eq!(frame.size(), FrameSize::new(5, 3));
        assert_eq!(frame.planes().len(), 3);
    }

    #[test]
    fn frame_rejects_short_plane() {
        let size = FrameSize::new(4, 4);
        let err = Frame::new(
            vec![Plane::new(vec![0; 8], 4)],
            size,
            PixelFormat::Bgr24,
            0,
        );
        assert!(err.is_err());
    }

    #[test]
    fn frame_rejects_wrong_plane_count() {
        let size = FrameSize::new(2, 2);
        let err = Frame::new(vec![Plane::new(vec![0; 4], 2)], size, PixelFormat::Nv12, 0);
        assert!(matches!(err, Err(DecodeError::InvalidFrame(_))));
    }

    #[test]
    fn overflowing_stride_is_rejected() {
        let size = FrameSize::new(2, 3);
        let err = Frame::new(
            vec![Plane::new(vec![0; 6], usize::MAX / 2)],
            size,
            PixelFormat::Bgr24,
            0,
        );
        assert!(matches!(err, Err(DecodeError::InvalidFrame(_))));
    }

    #[test]
    fn padded_stride_is_accepted() {
        let size = FrameSize::new(3, 2);
        // Last row need not include its padding.
        let frame = Frame::new(
            vec![Plane::new(vec![0; 16 + 12], 16)],
            size,
            PixelFormat::Bgra8,
            7,
        )
        .unwrap();
        assert_eq!(frame.index(), 7);
    }

    #[test]
    fn plane_copy_strips_padding() {
        let src = [1u8, 2, 0, 0, 3, 4, 0, 0];
        let plane = Plane::copy_from(&src, 4, 2, 2);
        assert_eq!(plane.data, vec![1, 2, 3, 4]);
        assert_eq!(plane.stride, 2);
    }

    #[test]
    fn ffmpeg_names() {
        assert_eq!(PixelFormat::from_ffmpeg_name("yuvj420p"), Some(PixelFormat::Yuv420p));
        assert_eq!(PixelFormat::from_ffmpeg_name("p010le"), None);
    }
}
