//! Mask-guided inpainting around a fixed-resolution network.
//!
//! The network sees a 512x512 canvas. Sources are downscaled to fit (never
//! upscaled) and placed in the top-left corner; the restored region is then
//! cropped, scaled back, and pasted only where the mask is selected.

pub mod onnx;
pub mod tensor;

use image::{GrayImage, RgbaImage};
use ndarray::Array4;

use crate::error::{Error, Result};

pub use onnx::{OnnxFactory, OnnxModel};
pub use tensor::output_is_normalized;

/// Edge length of the square network input.
pub const MODEL_SIZE: u32 = 512;

/// An inference session for a LaMa-style inpainting network.
///
/// Inputs are `image: [1, 3, 512, 512]` RGB in `[0, 1]` and
/// `mask: [1, 1, 512, 512]` in `{0, 1}`. The output is `[1, 3, 512, 512]`
/// in either `[0, 1]` or `[0, 255]`.
pub trait InpaintModel: Send {
    /// Run the network once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inference`] if the runtime rejects the inputs or fails.
    fn infer(&mut self, image: &Array4<f32>, mask: &Array4<f32>) -> Result<Array4<f32>>;
}

/// Builds an [`InpaintModel`] from serialized model bytes.
pub trait SessionFactory: Send + Sync {
    /// Construct a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if the bytes are not a usable model.
    fn build(&self, model_bytes: &[u8]) -> Result<Box<dyn InpaintModel>>;
}

/// Inpaint the selected region of `image`.
///
/// Pixels where `mask` is not selected are copied unchanged from `image`.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the mask does not match the image,
/// or the model's error if inference fails.
pub fn inpaint(model: &mut dyn InpaintModel, image: &RgbaImage, mask: &GrayImage) -> Result<RgbaImage> {
    let (width, height) = image.dimensions();
    let (mask_width, mask_height) = mask.dimensions();
    if (width, height) != (mask_width, mask_height) {
        return Err(Error::DimensionMismatch {
            width,
            height,
            mask_width,
            mask_height,
        });
    }

    let prepared = tensor::preprocess(image, mask);
    tracing::debug!(
        scale = prepared.scale,
        width = prepared.scaled_size.0,
        height = prepared.scaled_size.1,
        "running inpainting"
    );
    let output = model.infer(&prepared.image, &prepared.mask)?;
    let restored = tensor::postprocess(&output, prepared.scaled_size)?;
    Ok(tensor::compose(image, mask, &restored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    /// Paints every pixel of the canvas a fixed color, in `[0, 1]` range.
    struct Flat([f32; 3]);

    impl InpaintModel for Flat {
        fn infer(&mut self, image: &Array4<f32>, _mask: &Array4<f32>) -> Result<Array4<f32>> {
            let mut out = Array4::zeros(image.raw_dim());
            for c in 0..3 {
                out.index_axis_mut(ndarray::Axis(1), c).fill(self.0[c]);
            }
            Ok(out)
        }
    }

    struct Broken;

    impl InpaintModel for Broken {
        fn infer(&mut self, _: &Array4<f32>, _: &Array4<f32>) -> Result<Array4<f32>> {
            Err(Error::Inference("boom".into()))
        }
    }

    #[test]
    fn only_masked_pixels_change() {
        let image = RgbaImage::from_pixel(1200, 900, Rgba([10, 20, 30, 255]));
        let mask = GrayImage::from_fn(1200, 900, |x, y| {
            if (100..300).contains(&x) && (100..200).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        });

        let out = inpaint(&mut Flat([1.0, 0.0, 0.0]), &image, &mask).unwrap();
        assert_eq!(out.dimensions(), (1200, 900));
        assert_eq!(out.get_pixel(150, 150), &Rgba([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(50, 50), &Rgba([10, 20, 30, 255]));
        assert_eq!(out.get_pixel(1199, 899), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let image = RgbaImage::new(100, 100);
        let mask = GrayImage::new(50, 50);
        let err = inpaint(&mut Flat([0.0; 3]), &image, &mask).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { mask_width: 50, .. }));
    }

    #[test]
    fn model_errors_propagate() {
        let image = RgbaImage::new(10, 10);
        let mask = GrayImage::from_pixel(10, 10, Luma([255]));
        assert!(matches!(
            inpaint(&mut Broken, &image, &mask),
            Err(Error::Inference(_))
        ));
    }
}
