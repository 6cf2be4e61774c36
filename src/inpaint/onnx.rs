//! ONNX Runtime backend.

use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};

use super::{InpaintModel, SessionFactory};

/// Builds [`OnnxModel`] sessions from serialized model bytes.
#[derive(Debug, Clone)]
pub struct OnnxFactory {
    intra_threads: usize,
}

impl OnnxFactory {
    /// Create a factory; `intra_threads` of 0 lets the runtime choose.
    #[must_use]
    pub fn new(intra_threads: usize) -> Self {
        Self { intra_threads }
    }
}

impl Default for OnnxFactory {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SessionFactory for OnnxFactory {
    fn build(&self, model_bytes: &[u8]) -> Result<Box<dyn InpaintModel>> {
        let _span = tracing::info_span!("build_session", bytes = model_bytes.len()).entered();

        let mut builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(|e| Error::ModelLoad(e.to_string()))?;
        if self.intra_threads > 0 {
            builder = builder
                .with_intra_threads(self.intra_threads)
                .map_err(|e| Error::ModelLoad(e.to_string()))?;
        }
        let session = builder
            .commit_from_memory(model_bytes)
            .map_err(|e| Error::ModelLoad(e.to_string()))?;

        tracing::info!("inference session ready");
        Ok(Box::new(OnnxModel { session }))
    }
}

/// An ONNX Runtime session over an inpainting network with `image` and
/// `mask` inputs.
pub struct OnnxModel {
    session: Session,
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel").finish_non_exhaustive()
    }
}

fn inference_error(e: impl std::fmt::Display) -> Error {
    Error::Inference(e.to_string())
}

fn to_tensor(array: &Array4<f32>) -> Result<Tensor<f32>> {
    let (n, c, h, w) = array.dim();
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_array(([n, c, h, w], data)).map_err(inference_error)
}

impl InpaintModel for OnnxModel {
    fn infer(&mut self, image: &Array4<f32>, mask: &Array4<f32>) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("infer").entered();

        let image = to_tensor(image)?;
        let mask = to_tensor(mask)?;
        let outputs = self
            .session
            .run(ort::inputs!["image" => image, "mask" => mask])
            .map_err(inference_error)?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;
        let dims = shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(inference_error)?;
        let [n, c, h, w] = dims[..] else {
            return Err(Error::Inference(format!("expected 4-d output, got {dims:?}")));
        };

        Array4::from_shape_vec((n, c, h, w), data.to_vec()).map_err(inference_error)
    }
}
