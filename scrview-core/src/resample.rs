//! Per-viewer resampling into the display format.
//!
//! Every viewer receives 3-byte B-G-R pixels at exactly its registered size.
//! Scaling is nearest-neighbour through precomputed row/column maps; colour
//! conversion from YUV uses BT.601 limited-range integer coefficients.

use crate::error::ResampleError;
use crate::frame::{Frame, FrameSize, PixelFormat};

// ── DisplayImage ─────────────────────────────────────────────────

/// A display-ready picture owned by one viewer and reused across frames.
#[derive(Debug, Clone)]
pub struct DisplayImage {
    size: FrameSize,
    data: Vec<u8>,
}

impl DisplayImage {
    /// Allocate a black image of `size`.
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            data: vec![0; size.area() * 3],
        }
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

    /// Always [`PixelFormat::DISPLAY`].
    pub fn format(&self) -> PixelFormat {
        PixelFormat::DISPLAY
    }

    /// Row pitch in bytes (rows are tightly packed).
    pub fn stride(&self) -> usize {
        self.size.width as usize * 3
    }

    /// Tightly packed B-G-R rows.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The B-G-R triple at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let off = y as usize * self.stride() + x as usize * 3;
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }
}

// ── ScaleContext ─────────────────────────────────────────────────

/// Precomputed sampling maps for one (source, target) pair.
#[derive(Debug)]
struct ScaleContext {
    source: FrameSize,
    format: PixelFormat,
    /// Source column for every target column.
    x_map: Vec<usize>,
    /// Source row for every target row.
    y_map: Vec<usize>,
}

impl ScaleContext {
    fn new(source: FrameSize, format: PixelFormat, target: FrameSize) -> Self {
        Self {
            source,
            format,
            x_map: sample_map(source.width, target.width),
            y_map: sample_map(source.height, target.height),
        }
    }

    fn matches(&self, source: FrameSize, format: PixelFormat) -> bool {
        self.source == source && self.format == format
    }
}

/// Centre-sampled nearest-neighbour index map.
fn sample_map(src: u32, dst: u32) -> Vec<usize> {
    let (src, dst) = (src as u64, dst as u64);
    (0..dst)
        .map(|i| (((2 * i + 1) * src) / (2 * dst)).min(src - 1) as usize)
        .collect()
}

// ── Resampler ────────────────────────────────────────────────────

/// Converts frames of any supported layout into a fixed-size display image.
///
/// The scale context is built on first use and rebuilt whenever the source
/// size or format changes; the output buffer is allocated once.
#[derive(Debug)]
pub struct Resampler {
    target: FrameSize,
    context: Option<ScaleContext>,
    output: DisplayImage,
}

impl Resampler {
    pub fn new(target: FrameSize) -> Result<Self, ResampleError> {
        if target.is_empty() {
            return Err(ResampleError::EmptyTarget {
                width: target.width,
                height: target.height,
            });
        }
        Ok(Self {
            target,
            context: None,
            output: DisplayImage::new(target),
        })
    }

    pub fn target(&self) -> FrameSize {
        self.target
    }

    /// The most recent output (black before the first frame).
    pub fn output(&self) -> &DisplayImage {
        &self.output
    }

    /// Resample `frame` into the owned output buffer and return it.
    pub fn resample(&mut self, frame: &Frame) -> Result<&DisplayImage, ResampleError> {
        if frame.size().is_empty() {
            return Err(ResampleError::EmptySource);
        }
        check_planes(frame)?;

        let stale = self
            .context
            .as_ref()
            .is_none_or(|ctx| !ctx.matches(frame.size(), frame.format()));
        if stale {
            tracing::debug!(
                source = %frame.size(),
                target = %self.target,
                format = ?frame.format(),
                "building scale context"
            );
            self.context = Some(ScaleContext::new(frame.size(), frame.format(), self.target));
        }
        let Some(ctx) = self.context.as_ref() else {
            return Err(ResampleError::EmptySource);
        };

        let stride = self.output.stride();
        for (ty, &sy) in ctx.y_map.iter().enumerate() {
            let row = &mut self.output.data[ty * stride..(ty + 1) * stride];
            for (tx, &sx) in ctx.x_map.iter().enumerate() {
                let bgr = sample(frame, sx, sy);
                row[tx * 3..tx * 3 + 3].copy_from_slice(&bgr);
            }
        }

        Ok(&self.output)
    }
}

/// Bounds-check every plane a frame's format needs.
fn check_planes(frame: &Frame) -> Result<(), ResampleError> {
    let format = frame.format();
    for i in 0..format.plane_count() {
        let plane = frame.plane(i).ok_or(ResampleError::MissingPlane(i))?;
        let (row_bytes, rows) = format.plane_extent(i, frame.size());
        let expected = plane.required_len(row_bytes, rows).unwrap_or(usize::MAX);
        if plane.stride < row_bytes || plane.data.len() < expected {
            return Err(ResampleError::PlaneTooShort {
                plane: i,
                expected,
                actual: plane.data.len(),
            });
        }
    }
    Ok(())
}

/// B-G-R value of source pixel `(x, y)`. Planes are already bounds-checked.
fn sample(frame: &Frame, x: usize, y: usize) -> [u8; 3] {
    let planes = frame.planes();
    match frame.format() {
        PixelFormat::Yuv420p => {
            let (yp, up, vp) = (&planes[0], &planes[1], &planes[2]);
            let luma = yp.data[y * yp.stride + x];
            let u = up.data[(y / 2) * up.stride + x / 2];
            let v = vp.data[(y / 2) * vp.stride + x / 2];
            yuv_to_bgr(luma, u, v)
        }
        PixelFormat::Nv12 => {
            let (yp, uv) = (&planes[0], &planes[1]);
            let luma = yp.data[y * yp.stride + x];
            let off = (y / 2) * uv.stride + (x / 2) * 2;
            yuv_to_bgr(luma, uv.data[off], uv.data[off + 1])
        }
        PixelFormat::Bgra8 | PixelFormat::Bgr24 => {
            let p = &planes[0];
            let bpp = frame.format().bytes_per_pixel().unwrap_or(3);
            let off = y * p.stride + x * bpp;
            [p.data[off], p.data[off + 1], p.data[off + 2]]
        }
        PixelFormat::Rgba8 | PixelFormat::Rgb24 => {
            let p = &planes[0];
            let bpp = frame.format().bytes_per_pixel().unwrap_or(3);
            let off = y * p.stride + x * bpp;
            [p.data[off + 2], p.data[off + 1], p.data[off]]
        }
    }
}

/// BT.601 limited range, 8-bit fixed point.
fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as i32 - 16) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    let r = clamp(c + 409 * e);
    let g = clamp(c - 100 * d - 208 * e);
    let b = clamp(c + 516 * d);
    [b, g, r]
}

// ── Tests ────────────────────────────────────────────────────────
