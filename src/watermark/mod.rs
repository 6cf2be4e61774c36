//! Automatic watermark detection and removal.
//!
//! The overlay is a semi-transparent white logo stamped at a fixed offset from
//! the bottom-right corner. [`WatermarkEngine`] locates the tile, checks the
//! brightening signature against the tile's [`AlphaMap`], and inverts the
//! alpha blend when the check passes.

pub mod alpha_map;
pub mod blending;
pub mod detection;

use std::path::{Path, PathBuf};

use image::RgbaImage;

pub use alpha_map::{watermark_config, AlphaMap, AlphaMapCache, WatermarkConfig, WatermarkSize};
pub use detection::{DetectionResult, DETECTION_THRESHOLD};

use crate::error::Error;
use crate::export::{is_supported_image, save_image};

/// Options controlling batch watermark processing.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Skip watermark detection, process unconditionally.
    pub force: bool,
    /// Detection confidence threshold (0.0-1.0).
    pub threshold: f32,
    /// Force a specific watermark size instead of deriving it from the image.
    pub force_size: Option<WatermarkSize>,
    /// Enable verbose logging.
    pub verbose: bool,
    /// Suppress non-error output.
    pub quiet: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            force: false,
            threshold: DETECTION_THRESHOLD,
            force_size: None,
            verbose: false,
            quiet: false,
        }
    }
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether the file was skipped (no watermark detected).
    pub skipped: bool,
    /// Detection confidence score.
    pub confidence: f32,
    /// Human-readable status message.
    pub message: String,
}

impl ProcessResult {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            success: false,
            skipped: false,
            confidence: 0.0,
            message: String::new(),
        }
    }
}

/// Detects and removes the watermark overlay.
///
/// Create once and reuse: alpha maps are loaded on first use of each tile size
/// and kept for the lifetime of the engine.
#[derive(Debug, Default)]
pub struct WatermarkEngine {
    maps: AlphaMapCache,
}

impl WatermarkEngine {
    /// Create an engine reading reference tiles from `asset_dir`
    /// (`wm-alpha-48.png`, `wm-alpha-96.png`). Without a directory, or when a
    /// tile cannot be read, a synthesized fallback map is used.
    #[must_use]
    pub fn new(asset_dir: Option<PathBuf>) -> Self {
        Self {
            maps: AlphaMapCache::new(asset_dir),
        }
    }

    /// Create an engine over an existing alpha-map cache.
    #[must_use]
    pub fn with_cache(maps: AlphaMapCache) -> Self {
        Self { maps }
    }

    /// Tile configuration for an image, honoring a forced size.
    fn config(width: u32, height: u32, force_size: Option<WatermarkSize>) -> WatermarkConfig {
        force_size.map_or_else(|| watermark_config(width, height), WatermarkConfig::for_size)
    }

    /// Detect the watermark using the standard threshold.
    #[must_use]
    pub fn detect(&self, image: &RgbaImage) -> DetectionResult {
        self.detect_with(image, &ProcessOptions::default())
    }

    /// Detect the watermark with explicit options.
    #[must_use]
    pub fn detect_with(&self, image: &RgbaImage, opts: &ProcessOptions) -> DetectionResult {
        let config = Self::config(image.width(), image.height(), opts.force_size);
        let alpha_map = self.maps.alpha_map(config.size);
        detection::detect_watermark(image, &alpha_map, &config, opts.threshold)
    }

    /// Invert the blend at the detected tile.
    ///
    /// Returns `None` when `detection` did not find a watermark. The input is
    /// never modified.
    #[must_use]
    pub fn remove(&self, image: &RgbaImage, detection: &DetectionResult) -> Option<RgbaImage> {
        if !detection.exists {
            return None;
        }
        let (size, (x, y)) = detection.size.zip(detection.position)?;
        let alpha_map = self.maps.alpha_map(size);
        Some(blending::remove_watermark_alpha_blend(image, &alpha_map, x, y))
    }

    /// Invert the blend at the expected tile position without detecting first.
    ///
    /// Returns `None` when the image is too small to hold the tile.
    #[must_use]
    pub fn remove_unchecked(&self, image: &RgbaImage, force_size: Option<WatermarkSize>) -> Option<RgbaImage> {
        let config = Self::config(image.width(), image.height(), force_size);
        let (x, y) = config.position(image.width(), image.height())?;
        let alpha_map = self.maps.alpha_map(config.size);
        Some(blending::remove_watermark_alpha_blend(image, &alpha_map, x, y))
    }

    /// Detect and, if found, remove the watermark.
    ///
    /// Below-threshold detections are not an error: they simply yield `None`.
    #[must_use]
    pub fn detect_and_remove(&self, image: &RgbaImage) -> Option<(RgbaImage, DetectionResult)> {
        let detection = self.detect(image);
        tracing::debug!(
            exists = detection.exists,
            confidence = detection.confidence,
            "watermark detection"
        );
        let cleaned = self.remove(image, &detection)?;
        Some((cleaned, detection))
    }

    /// Process a single image file: load, detect, remove, save.
    ///
    /// Returns a [`ProcessResult`] indicating success, skip, or failure.
    #[must_use]
    pub fn process_file(&self, input: &Path, output: &Path, opts: &ProcessOptions) -> ProcessResult {
        let mut result = ProcessResult::new(input);

        let img = match image::open(input) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                result.message = format!("Failed to load: {e}");
                return result;
            }
        };
        let (w, h) = img.dimensions();

        let config = Self::config(w, h, opts.force_size);
        if config.position(w, h).is_none() {
            result.skipped = true;
            result.success = true;
            result.message = Error::ImageTooSmall {
                width: w,
                height: h,
                wm_size: config.size.pixels(),
            }
            .to_string();
            return result;
        }

        let cleaned = if opts.force {
            self.remove_unchecked(&img, opts.force_size)
        } else {
            let detection = self.detect_with(&img, opts);
            result.confidence = detection.confidence;
            if !detection.exists {
                result.skipped = true;
                result.success = true;
                result.message = format!(
                    "No watermark detected ({:.0}% confidence, ratio={:.2}, corr={:.2}, brightening={:.1})",
                    detection.confidence * 100.0,
                    detection.brightening_ratio,
                    detection.correlation,
                    detection.brightening,
                );
                return result;
            }
            self.remove(&img, &detection)
        };

        let Some(cleaned) = cleaned else {
            result.message = "Watermark tile does not fit the image".to_string();
            return result;
        };

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    result.message = format!("Failed to create output directory: {e}");
                    return result;
                }
            }
        }

        match save_image(&cleaned, output) {
            Ok(()) => {
                result.success = true;
                result.message = "Watermark removed".to_string();
            }
            Err(e) => {
                result.message = format!("Failed to save: {e}");
            }
        }

        result
    }

    /// Process all supported images in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    /// Returns a [`ProcessResult`] for each image found.
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        opts: &ProcessOptions,
    ) -> Vec<ProcessResult> {
        let entries: Vec<PathBuf> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .filter(|p| is_supported_image(p))
                .collect(),
            Err(e) => {
                let mut failed = ProcessResult::new(input_dir);
                failed.message = format!("Failed to read directory: {e}");
                return vec![failed];
            }
        };

        if !output_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                let mut failed = ProcessResult::new(output_dir);
                failed.message = format!("Failed to create output directory: {e}");
                return vec![failed];
            }
        }

        let process = |input_path: &PathBuf| {
            let output_path = match input_path.file_name() {
                Some(name) => output_dir.join(name),
                None => output_dir.join("output.png"),
            };
            self.process_file(input_path, &output_path, opts)
        };

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            entries.par_iter().map(process).collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            entries.iter().map(process).collect()
        }
    }
}
