//! Pixel-buffer and mask helpers.
//!
//! Masks are single-channel [`GrayImage`]s holding the brush coverage. A pixel
//! counts as selected when its value exceeds [`MASK_THRESHOLD`], which leaves
//! room for the antialiased brush edge.

use image::{GrayImage, Luma, RgbaImage};

/// Mask values at or below this are not selected.
pub const MASK_THRESHOLD: u8 = 128;

/// A position in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f32,
    /// Vertical coordinate.
    pub y: f32,
}

impl Point {
    /// Create a point.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Euclidean distance between two points.
#[must_use]
pub fn distance(a: Point, b: Point) -> f32 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Linear interpolation between `start` and `end`.
#[must_use]
pub fn lerp(start: f32, end: f32, t: f32) -> f32 {
    start + (end - start) * t
}

/// Evenly spaced points from `a` to `b` (both included), at most `step` apart.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn interpolate_points(a: Point, b: Point, step: f32) -> Vec<Point> {
    let d = distance(a, b);
    if d <= f32::EPSILON || step <= 0.0 {
        return vec![a];
    }

    let steps = (d / step).ceil() as usize;
    (0..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            Point::new(lerp(a.x, b.x, t), lerp(a.y, b.y, t))
        })
        .collect()
}

/// Whether a mask value marks a selected pixel.
#[inline]
#[must_use]
pub fn is_selected(value: u8) -> bool {
    value > MASK_THRESHOLD
}

/// Whether any pixel of `mask` is selected.
#[must_use]
pub fn has_selection(mask: &GrayImage) -> bool {
    mask.pixels().any(|p| is_selected(p[0]))
}

/// Paint a filled disc of the given diameter.
pub fn stamp_circle(mask: &mut GrayImage, center: Point, diameter: f32) {
    stroke_segment(mask, center, center, diameter);
}

/// Paint a round-capped line of width `diameter` from `from` to `to`.
///
/// Coverage is computed from the exact distance to the segment, so the capsule
/// is continuous no matter how far apart the endpoints are. Existing coverage
/// is never reduced.
pub fn stroke_segment(mask: &mut GrayImage, from: Point, to: Point, diameter: f32) {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let radius = (diameter * 0.5).max(0.5);

    let Some((x0, x1)) = span(from.x.min(to.x) - radius, from.x.max(to.x) + radius, width) else {
        return;
    };
    let Some((y0, y1)) = span(from.y.min(to.y) - radius, from.y.max(to.y) + radius, height) else {
        return;
    };

    for y in y0..=y1 {
        for x in x0..=x1 {
            #[allow(clippy::cast_precision_loss)]
            let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
            let coverage = (radius + 0.5 - distance_to_segment(center, from, to)).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let value = (coverage * 255.0).round() as u8;
            let px = mask.get_pixel_mut(x, y);
            if value > px[0] {
                *px = Luma([value]);
            }
        }
    }
}

/// Inclusive pixel range covering `[lo, hi]`, clipped to `0..len`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn span(lo: f32, hi: f32, len: u32) -> Option<(u32, u32)> {
    let lo = lo.floor().max(0.0);
    let hi = hi.ceil().min(len as f32 - 1.0);
    if hi < lo {
        return None;
    }
    Some((lo as u32, hi as u32))
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let len_sq = abx * abx + aby * aby;
    if len_sq <= f32::EPSILON {
        return distance(p, a);
    }
    let t = (((p.x - a.x) * abx + (p.y - a.y) * aby) / len_sq).clamp(0.0, 1.0);
    distance(p, Point::new(a.x + t * abx, a.y + t * aby))
}

/// Extract the red channel of an RGBA buffer as a mask.
#[must_use]
pub fn red_channel(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[0]])
    })
}
