//! Alpha blending math for watermark removal.
//!
//! The overlay is applied via forward alpha blending with a white logo:
//! `watermarked = alpha * 255 + (1 - alpha) * original`
//!
//! This module provides that forward model and its inverse.

use image::RgbaImage;

use super::alpha_map::AlphaMap;

/// Alpha threshold: pixels with less watermark effect than this are left alone.
const ALPHA_THRESHOLD: f32 = 0.001;

/// Maximum alpha: clamp to avoid division by near-zero in reverse blending.
const MAX_ALPHA: f32 = 0.99;

/// Logo color of the overlay (white).
const LOGO_VALUE: f32 = 255.0;

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Visit every tile pixel that lies inside the image, with its alpha.
fn for_each_tile_pixel(
    image: &mut RgbaImage,
    alpha_map: &AlphaMap,
    pos_x: u32,
    pos_y: u32,
    mut f: impl FnMut(&mut image::Rgba<u8>, f32),
) {
    let size = alpha_map.size();
    let x2 = pos_x.saturating_add(size).min(image.width());
    let y2 = pos_y.saturating_add(size).min(image.height());
    if pos_x >= x2 || pos_y >= y2 {
        return;
    }

    for dy in 0..(y2 - pos_y) {
        for dx in 0..(x2 - pos_x) {
            let alpha = alpha_map.get(dx, dy);
            f(image.get_pixel_mut(pos_x + dx, pos_y + dy), alpha);
        }
    }
}

/// Stamp the watermark onto a copy of `image` using the forward blend.
#[must_use]
pub fn blend_watermark(image: &RgbaImage, alpha_map: &AlphaMap, pos_x: u32, pos_y: u32) -> RgbaImage {
    let mut out = image.clone();
    for_each_tile_pixel(&mut out, alpha_map, pos_x, pos_y, |px, alpha| {
        for ch in 0..3 {
            let original = f32::from(px[ch]);
            px[ch] = to_channel(alpha * LOGO_VALUE + (1.0 - alpha) * original);
        }
    });
    out
}

/// Remove the watermark from a copy of `image` using reverse alpha blending.
///
/// Applies `original = (watermarked - alpha * 255) / (1 - alpha)` to the RGB
/// channels inside the tile. Alpha is clamped to 0.99, pixels with alpha
/// below 0.001 are left unchanged, and the alpha channel is never touched.
///
/// The watermarked pixel was rounded to `u8`, and the inversion scales that
/// rounding error by `1 / (1 - alpha)`. A recovered channel is therefore within
/// `0.5 / (1 - alpha) + 0.5` levels of the original: at most 1 for alpha up to
/// 2/3, growing to about 50 at the 0.99 clamp.
#[must_use]
pub fn remove_watermark_alpha_blend(
    image: &RgbaImage,
    alpha_map: &AlphaMap,
    pos_x: u32,
    pos_y: u32,
) -> RgbaImage {
    let mut out = image.clone();
    for_each_tile_pixel(&mut out, alpha_map, pos_x, pos_y, |px, alpha| {
        if alpha < ALPHA_THRESHOLD {
            return;
        }

        let alpha = alpha.min(MAX_ALPHA);
        let inv_alpha = 1.0 - alpha;
        for ch in 0..3 {
            let watermarked = f32::from(px[ch]);
            px[ch] = to_channel((watermarked - alpha * LOGO_VALUE) / inv_alpha);
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[allow(clippy::cast_precision_loss)]
    fn gradient_map(size: u32, max_alpha: f32) -> AlphaMap {
        AlphaMap::from_fn(size, |x, y| (y * size + x) as f32 / (size * size) as f32 * max_alpha)
    }

    fn source() -> RgbaImage {
        RgbaImage::from_fn(100, 100, |x, y| {
            Rgba([
                u8::try_from(x * 2).unwrap_or(u8::MAX),
                u8::try_from(y * 2).unwrap_or(u8::MAX),
                200,
                255,
            ])
        })
    }

    #[test]
    fn reverse_blend_recovers_original_within_one_level() {
        let original = source();
        // Rounding stays within one level while 0.5 / (1 - alpha) < 1.5.
        let map = gradient_map(10, 0.66);

        let stamped = blend_watermark(&original, &map, 50, 50);
        assert_ne!(stamped, original);
        let restored = remove_watermark_alpha_blend(&stamped, &map, 50, 50);

        for (a, b) in restored.pixels().zip(original.pixels()) {
            for ch in 0..4 {
                let diff = (i32::from(a[ch]) - i32::from(b[ch])).abs();
                assert!(diff <= 1, "restored={a:?} original={b:?}");
            }
        }
    }

    #[test]
    fn reverse_blend_error_grows_with_alpha_up_to_the_clamp() {
        let original = source();
        let map = gradient_map(16, 0.99);
        let stamped = blend_watermark(&original, &map, 40, 40);
        let restored = remove_watermark_alpha_blend(&stamped, &map, 40, 40);

        for dy in 0..16 {
            for dx in 0..16 {
                let alpha = map.get(dx, dy);
                let bound = 0.5 / (1.0 - alpha) + 0.5 + 1e-3;
                let a = restored.get_pixel(40 + dx, 40 + dy);
                let b = original.get_pixel(40 + dx, 40 + dy);
                for ch in 0..3 {
                    let diff = (f32::from(a[ch]) - f32::from(b[ch])).abs();
                    assert!(diff <= bound, "alpha={alpha} restored={a:?} original={b:?}");
                }
                assert_eq!(a[3], b[3]);
            }
        }
    }

    #[test]
    fn caller_buffer_is_not_mutated() {
        let img = RgbaImage::from_pixel(20, 20, Rgba([250, 250, 250, 255]));
        let map = AlphaMap::from_fn(10, |_, _| 0.5);
        let before = img.clone();
        let _ = remove_watermark_alpha_blend(&img, &map, 5, 5);
        assert_eq!(img, before);
    }

    #[test]
    fn transparent_tile_pixels_and_alpha_channel_are_untouched() {
        let img = RgbaImage::from_pixel(20, 20, Rgba([120, 130, 140, 77]));
        let map = AlphaMap::from_fn(10, |x, _| if x < 5 { 0.0005 } else { 0.4 });
        let out = remove_watermark_alpha_blend(&img, &map, 0, 0);

        assert_eq!(out.get_pixel(2, 2), img.get_pixel(2, 2));
        assert_ne!(out.get_pixel(7, 2)[0], 120);
        assert_eq!(out.get_pixel(7, 2)[3], 77);
        assert_eq!(out.get_pixel(15, 15), img.get_pixel(15, 15));
    }

    #[test]
    fn full_opacity_is_clamped_not_divided_by_zero() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let map = AlphaMap::from_fn(4, |_, _| 1.0);
        let out = remove_watermark_alpha_blend(&img, &map, 0, 0);
        // (255 - 0.99 * 255) / 0.01 = 255
        assert_eq!(out.get_pixel(1, 1)[0], 255);
    }

    #[test]
    fn tile_is_clipped_at_image_edge() {
        let img = RgbaImage::from_pixel(12, 12, Rgba([200, 200, 200, 255]));
        let map = AlphaMap::from_fn(10, |_, _| 0.3);
        let out = remove_watermark_alpha_blend(&img, &map, 8, 8);
        assert_ne!(out.get_pixel(11, 11), img.get_pixel(11, 11));
        assert_eq!(out.get_pixel(7, 7), img.get_pixel(7, 7));
    }
}
