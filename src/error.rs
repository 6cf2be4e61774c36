//! Error types for the mark-eraser crate.

/// Errors that can occur while editing, inpainting, or removing watermarks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to decode a reference alpha-map tile.
    #[error("failed to decode alpha map PNG: {0}")]
    AlphaMapDecode(image::ImageError),

    /// The image is too small to contain a watermark at the expected position.
    #[error("image too small ({width}x{height}) for {wm_size}x{wm_size} watermark")]
    ImageTooSmall {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Expected watermark size in pixels.
        wm_size: u32,
    },

    /// The mask does not cover the image it was drawn for.
    #[error("mask is {mask_width}x{mask_height} but image is {width}x{height}")]
    DimensionMismatch {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Mask width in pixels.
        mask_width: u32,
        /// Mask height in pixels.
        mask_height: u32,
    },

    /// Downloading, caching, or constructing the inference session failed.
    /// Retryable: the next load attempt starts from scratch.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// The background context failed while running the network.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The request was abandoned through its cancellation token.
    #[error("request cancelled")]
    Cancelled,

    /// The background execution context has shut down or crashed.
    #[error("background worker is not running")]
    WorkerUnavailable,

    /// An editor operation needs an image but none is loaded.
    #[error("no image loaded")]
    NoImage,

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let too_small = Error::ImageTooSmall {
            width: 10,
            height: 20,
            wm_size: 48,
        };
        let msg = too_small.to_string();
        assert!(msg.contains("10x20"));
        assert!(msg.contains("48x48"));
    }

    #[test]
    fn mismatch_names_both_sizes() {
        let err = Error::DimensionMismatch {
            width: 800,
            height: 600,
            mask_width: 400,
            mask_height: 300,
        };
        let msg = err.to_string();
        assert!(msg.contains("400x300"));
        assert!(msg.contains("800x600"));
    }

    #[test]
    fn load_failure_carries_cause() {
        let err = Error::ModelLoad("HTTP 404".to_string());
        assert!(err.to_string().contains("HTTP 404"));
    }
}
