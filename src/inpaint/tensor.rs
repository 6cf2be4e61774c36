//! Tensor packing and unpacking around the fixed 512x512 network input.

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgba, RgbaImage};
use ndarray::Array4;

use crate::error::{Error, Result};
use crate::raster::is_selected;

use super::MODEL_SIZE;

/// Number of leading output values inspected to guess the output range.
const RANGE_SAMPLE: usize = 1000;
/// Outputs whose sampled magnitude stays at or below this are in `[0, 1]`.
const NORMALIZED_LIMIT: f32 = 2.0;

/// Network inputs plus the geometry needed to map results back.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// `[1, 3, 512, 512]` channel-planar RGB in `[0, 1]`.
    pub image: Array4<f32>,
    /// `[1, 1, 512, 512]` binary mask.
    pub mask: Array4<f32>,
    /// Downscale factor applied to the source (never above 1).
    pub scale: f32,
    /// Source dimensions.
    pub original_size: (u32, u32),
    /// Dimensions of the region occupied in the top-left of the canvas.
    pub scaled_size: (u32, u32),
}

/// Scale factor and resulting size for fitting `width x height` into the
/// network canvas without upscaling.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn fit_to_canvas(width: u32, height: u32) -> (f32, (u32, u32)) {
    let side = MODEL_SIZE as f32;
    let scale = (side / width as f32).min(side / height as f32).min(1.0);
    let w = ((width as f32 * scale).round() as u32).clamp(1, MODEL_SIZE);
    let h = ((height as f32 * scale).round() as u32).clamp(1, MODEL_SIZE);
    (scale, (w, h))
}

/// Resize `image` and `mask` into the top-left corner of a black canvas and
/// pack them as network tensors.
#[must_use]
pub fn preprocess(image: &RgbaImage, mask: &GrayImage) -> Prepared {
    let _span = tracing::debug_span!("preprocess").entered();

    let original_size = image.dimensions();
    let (scale, scaled_size) = fit_to_canvas(original_size.0, original_size.1);
    let (sw, sh) = scaled_size;

    let resized = if image.dimensions() == scaled_size {
        image.clone()
    } else {
        imageops::resize(image, sw, sh, FilterType::Triangle)
    };
    let resized_mask = if mask.dimensions() == scaled_size {
        mask.clone()
    } else {
        imageops::resize(mask, sw, sh, FilterType::Triangle)
    };

    let side = MODEL_SIZE as usize;
    let mut image_tensor = Array4::<f32>::zeros((1, 3, side, side));
    let mut mask_tensor = Array4::<f32>::zeros((1, 1, side, side));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        image_tensor[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
        image_tensor[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
        image_tensor[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
    }
    for (x, y, value) in resized_mask.enumerate_pixels() {
        if is_selected(value[0]) {
            mask_tensor[[0, 0, y as usize, x as usize]] = 1.0;
        }
    }

    Prepared {
        image: image_tensor,
        mask: mask_tensor,
        scale,
        original_size,
        scaled_size,
    }
}

/// Guess whether raw network output is in `[0, 1]` (as opposed to `[0, 255]`).
///
/// The network does not declare its output range, so this looks at the
/// magnitude of the first values. It is a heuristic: a `[0, 255]` output that
/// happens to be nearly black in the sampled region is misread as normalized.
#[must_use]
pub fn output_is_normalized(values: &[f32]) -> bool {
    let max = values
        .iter()
        .take(RANGE_SAMPLE)
        .fold(0.0_f32, |m, v| m.max(v.abs()));
    max <= NORMALIZED_LIMIT
}

/// Turn a `[1, 3, H, W]` network output into an RGBA buffer cropped to
/// `scaled_size`.
///
/// # Errors
///
/// Returns [`Error::Inference`] if the output has an unexpected shape.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn postprocess(output: &Array4<f32>, scaled_size: (u32, u32)) -> Result<RgbaImage> {
    let _span = tracing::debug_span!("postprocess").entered();

    let (n, channels, height, width) = output.dim();
    let (sw, sh) = scaled_size;
    if n != 1 || channels != 3 || height < sh as usize || width < sw as usize {
        return Err(Error::Inference(format!(
            "unexpected output shape {:?} for {sw}x{sh} region",
            output.shape()
        )));
    }

    let head: Vec<f32> = output.iter().take(RANGE_SAMPLE).copied().collect();
    let factor = if output_is_normalized(&head) { 255.0 } else { 1.0 };
    let channel = |c: usize, x: u32, y: u32| -> u8 {
        (output[[0, c, y as usize, x as usize]] * factor)
            .round()
            .clamp(0.0, 255.0) as u8
    };

    Ok(RgbaImage::from_fn(sw, sh, |x, y| {
        Rgba([channel(0, x, y), channel(1, x, y), channel(2, x, y), 255])
    }))
}

/// Paste the restored region into a copy of `original`, only where `mask` is
/// selected. Every other pixel is copied unchanged from `original`.
#[must_use]
pub fn compose(original: &RgbaImage, mask: &GrayImage, restored: &RgbaImage) -> RgbaImage {
    let _span = tracing::debug_span!("compose").entered();

    let (width, height) = original.dimensions();
    let upscaled;
    let restored = if restored.dimensions() == (width, height) {
        restored
    } else {
        upscaled = imageops::resize(restored, width, height, FilterType::Triangle);
        &upscaled
    };

    let mut out = original.clone();
    for (x, y, value) in mask.enumerate_pixels() {
        if x >= width || y >= height || !is_selected(value[0]) {
            continue;
        }
        let src = restored.get_pixel(x, y);
        out.put_pixel(x, y, Rgba([src[0], src[1], src[2], 255]));
    }
    out
}
