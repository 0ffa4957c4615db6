//! Viewer-space to device-space coordinate mapping.

use serde::{Deserialize, Serialize};

use crate::error::CoordinateError;
use crate::frame::{AndroidSize, FrameSize};

/// A pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A device-space point together with the device frame size it refers to.
///
/// The remote side normalises `point` against `screen_size` itself, so the
/// size must be the source's *current* frame size at the time of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub point: Point,
    pub screen_size: AndroidSize,
}

impl Position {
    pub const fn new(point: Point, screen_size: AndroidSize) -> Self {
        Self { point, screen_size }
    }
}

/// Map `(x, y)` in a viewer of `viewer` size onto the device frame of
/// `source` size.
///
/// Uses truncating integer division with no rounding, which is what the
/// remote side's own scaling assumes.
pub fn to_device_space(
    source: FrameSize,
    viewer: FrameSize,
    x: i32,
    y: i32,
) -> Result<Point, CoordinateError> {
    if viewer.is_empty() {
        return Err(CoordinateError::EmptyViewer {
            width: viewer.width,
            height: viewer.height,
        });
    }
    let dx = source.width as i64 * x as i64 / viewer.width as i64;
    let dy = source.height as i64 * y as i64 / viewer.height as i64;
    Ok(Point::new(saturate(dx), saturate(dy)))
}

fn saturate(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_halving() {
        let p = to_device_space(
            FrameSize::new(1080, 2280),
            FrameSize::new(540, 1140),
            270,
            570,
        )
        .unwrap();
        assert_eq!(p, Point::new(540, 1140));
    }

    #[test]
    fn truncates_without_rounding() {
        // 1080 * 1 / 1000 = 1.08 → 1; 2280 * 999 / 1000 = 2277.72 → 2277
        let p = to_device_space(
            FrameSize::new(1080, 2280),
            FrameSize::new(1000, 1000),
            1,
            999,
        )
        .unwrap();
        assert_eq!(p, Point::new(1, 2277));
    }

    #[test]
    fn negative_coordinates_truncate_toward_zero() {
        let p = to_device_space(FrameSize::new(3, 3), FrameSize::new(2, 2), -1, -1).unwrap();
        assert_eq!(p, Point::new(-1, -1));
    }

    #[test]
    fn zero_viewer_dimension_is_rejected() {
        for viewer in [FrameSize::new(0, 10), FrameSize::new(10, 0), FrameSize::new(0, 0)] {
            let err = to_device_space(FrameSize::new(1080, 2280), viewer, 5, 5);
            assert!(matches!(err, Err(CoordinateError::EmptyViewer { .. })));
        }
    }
}
