//! Statistical test for a semi-transparent white watermark tile.
//!
//! The overlay only ever brightens pixels, and it brightens them in proportion
//! to the tile's alpha. Detection samples the tile region, splits the samples
//! into "watermark" (high alpha) and "background" (near-zero alpha) sets, and
//! checks three signatures:
//! 1. **Brightening ratio**: observed brightening vs. the forward blend model
//! 2. **Correlation**: Pearson correlation of alpha and brightness
//! 3. **Magnitude**: absolute brightening, capped at 30 levels

use image::RgbaImage;

use super::alpha_map::{AlphaMap, WatermarkConfig, WatermarkSize};

/// Detection fires at or above this confidence.
pub const DETECTION_THRESHOLD: f32 = 0.75;
/// Alpha at or above which a sample belongs to the watermark set.
const HIGH_ALPHA: f32 = 0.3;
/// Alpha below which a sample belongs to the background set.
const BACKGROUND_ALPHA: f32 = 0.05;
/// Minimum samples in the watermark set.
const MIN_HIGH_SAMPLES: usize = 10;
/// Minimum samples in the background set.
const MIN_BACKGROUND_SAMPLES: usize = 20;
/// Accepted range of observed / expected brightening.
const RATIO_RANGE: (f32, f32) = (0.4, 2.0);
/// Minimum alpha/brightness correlation in the watermark set.
const MIN_CORRELATION: f32 = 0.2;
/// Brightening (in 0-255 levels) that earns a full magnitude score.
const MAGNITUDE_CAP: f32 = 30.0;
/// Sample every other pixel in both directions.
const SAMPLE_STEP: usize = 2;

/// Result of watermark detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    /// Whether a watermark was detected above the confidence threshold.
    pub exists: bool,
    /// Overall confidence score in `[0, 1]`.
    pub confidence: f32,
    /// Tile size, set only when `exists`.
    pub size: Option<WatermarkSize>,
    /// Tile top-left corner, set only when `exists`.
    pub position: Option<(u32, u32)>,
    /// Observed / expected brightening.
    pub brightening_ratio: f32,
    /// Pearson correlation of alpha and brightness in the watermark set.
    pub correlation: f32,
    /// Mean brightening of the watermark set over the background set.
    pub brightening: f32,
}

/// Pearson correlation between two equal-length float slices.
///
/// `r = sum((a-mean_a)*(b-mean_b)) / sqrt(sum((a-mean_a)^2) * sum((b-mean_b)^2))`
fn pearson(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[allow(clippy::cast_precision_loss)]
    let n = a.len() as f32;
    if n < 1.0 {
        return 0.0;
    }

    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;

    let mut numerator = 0.0_f32;
    let mut denom_a = 0.0_f32;
    let mut denom_b = 0.0_f32;

    for (va, vb) in a.iter().zip(b.iter()) {
        let da = va - mean_a;
        let db = vb - mean_b;
        numerator += da * db;
        denom_a += da * da;
        denom_b += db * db;
    }

    let denom = (denom_a * denom_b).sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        numerator / denom
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f32;
    values.iter().sum::<f32>() / n
}

/// Detect whether the watermark described by `alpha_map` sits at the
/// position `config` prescribes for this image.
///
/// `threshold` is the confidence needed for `exists`; pass
/// [`DETECTION_THRESHOLD`] for the standard behavior.
#[must_use]
pub fn detect_watermark(
    image: &RgbaImage,
    alpha_map: &AlphaMap,
    config: &WatermarkConfig,
    threshold: f32,
) -> DetectionResult {
    let mut result = DetectionResult::default();

    let Some((pos_x, pos_y)) = config.position(image.width(), image.height()) else {
        return result;
    };
    let size = config.size.pixels();
    if alpha_map.size() != size {
        tracing::warn!(
            "{}px alpha map does not match the {size}px tile, skipping detection",
            alpha_map.size()
        );
        return result;
    }

    let mut high_alpha = Vec::new();
    let mut high_brightness = Vec::new();
    let mut background = Vec::new();

    for dy in (0..size).step_by(SAMPLE_STEP) {
        for dx in (0..size).step_by(SAMPLE_STEP) {
            let alpha = alpha_map.get(dx, dy);
            let px = image.get_pixel(pos_x + dx, pos_y + dy);
            let brightness = (f32::from(px[0]) + f32::from(px[1]) + f32::from(px[2])) / 3.0;

            if alpha >= HIGH_ALPHA {
                high_alpha.push(alpha);
                high_brightness.push(brightness);
            } else if alpha < BACKGROUND_ALPHA {
                background.push(brightness);
            }
        }
    }

    if high_alpha.len() < MIN_HIGH_SAMPLES || background.len() < MIN_BACKGROUND_SAMPLES {
        return result;
    }

    let high_mean = mean(&high_brightness);
    let background_mean = mean(&background);
    let brightening = high_mean - background_mean;
    result.brightening = brightening;

    // The overlay is additive white: it can only brighten.
    if brightening <= 0.0 {
        return result;
    }

    // Forward blend predicts alpha * (255 - background) of brightening.
    let expected = mean(&high_alpha) * (255.0 - background_mean);
    if expected <= f32::EPSILON {
        return result;
    }
    let ratio = brightening / expected;
    result.brightening_ratio = ratio;
    if !(RATIO_RANGE.0..=RATIO_RANGE.1).contains(&ratio) {
        return result;
    }

    let correlation = pearson(&high_alpha, &high_brightness);
    result.correlation = correlation;
    if correlation < MIN_CORRELATION {
        return result;
    }

    let ratio_score = (1.0 - (ratio - 1.0).abs()).max(0.0);
    let correlation_score = correlation.clamp(0.0, 1.0);
    let magnitude_score = (brightening / MAGNITUDE_CAP).min(1.0);

    result.confidence = ((ratio_score + correlation_score + magnitude_score) / 3.0).clamp(0.0, 1.0);
    result.exists = result.confidence >= threshold;
    if result.exists {
        result.size = Some(config.size);
        result.position = Some((pos_x, pos_y));
    }

    result
}
