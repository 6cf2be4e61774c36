//! Opacity maps for the known watermark tiles.
//!
//! A reference tile is the watermark rendered over pure black, so the
//! brightest channel of each pixel is the blend opacity:
//! `alpha = max(R, G, B) / 255`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};

use crate::error::{Error, Result};

/// Watermark tile classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatermarkSize {
    /// 48x48 tile, 32px margin (images where either dimension <= 1024).
    Small,
    /// 96x96 tile, 64px margin (images where both dimensions > 1024).
    Large,
}

impl WatermarkSize {
    /// Pick the tile for an image of the given dimensions.
    ///
    /// - **Large**: both width AND height > 1024
    /// - **Small**: otherwise (including 1024x1024)
    #[must_use]
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        if width > 1024 && height > 1024 {
            Self::Large
        } else {
            Self::Small
        }
    }

    /// Tile edge length in pixels.
    #[must_use]
    pub const fn pixels(self) -> u32 {
        match self {
            Self::Small => 48,
            Self::Large => 96,
        }
    }

    /// Distance from the right and bottom image edges to the tile.
    #[must_use]
    pub const fn margin(self) -> u32 {
        match self {
            Self::Small => 32,
            Self::Large => 64,
        }
    }
}

/// Where the watermark tile sits for a given image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkConfig {
    /// Tile size.
    pub size: WatermarkSize,
    /// Gap between the tile and the right image edge.
    pub margin_right: u32,
    /// Gap between the tile and the bottom image edge.
    pub margin_bottom: u32,
}

impl WatermarkConfig {
    /// Configuration for a specific tile size.
    #[must_use]
    pub const fn for_size(size: WatermarkSize) -> Self {
        Self {
            size,
            margin_right: size.margin(),
            margin_bottom: size.margin(),
        }
    }

    /// Top-left corner of the tile, or `None` when it would fall off the image.
    #[must_use]
    pub fn position(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let px = self.size.pixels();
        let x = width.checked_sub(px + self.margin_right)?;
        let y = height.checked_sub(px + self.margin_bottom)?;
        Some((x, y))
    }
}

/// Deterministic tile rule for an image of the given dimensions.
#[must_use]
pub fn watermark_config(width: u32, height: u32) -> WatermarkConfig {
    WatermarkConfig::for_size(WatermarkSize::for_dimensions(width, height))
}

/// Per-pixel blend opacity of a square watermark tile, row-major, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMap {
    size: u32,
    values: Vec<f32>,
}

impl AlphaMap {
    /// Build a map by evaluating `f(x, y)` for every tile pixel.
    /// Values are clamped to `[0, 1]`.
    pub fn from_fn(size: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut values = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                values.push(f(x, y).clamp(0.0, 1.0));
            }
        }
        Self { size, values }
    }

    /// Derive a map from a reference tile PNG rendered over black.
    ///
    /// The PNG is scaled to `size` if it has different dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlphaMapDecode`] if the PNG data cannot be decoded.
    pub fn from_png(png_bytes: &[u8], size: u32) -> Result<Self> {
        let mut img = image::load_from_memory(png_bytes)
            .map_err(Error::AlphaMapDecode)?
            .to_rgb8();
        if img.dimensions() != (size, size) {
            img = imageops::resize(&img, size, size, FilterType::Triangle);
        }

        let values = img
            .pixels()
            .map(|p| f32::from(p[0].max(p[1]).max(p[2])) / 255.0)
            .collect();
        Ok(Self { size, values })
    }

    /// Approximate star-shaped map used when no reference tile is available.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fallback(size: WatermarkSize) -> Self {
        let px = size.pixels();
        let center = px as f32 / 2.0;
        let radius = px as f32 * 0.35;
        let inner = radius * 0.7;

        Self::from_fn(px, |x, y| {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let dist = dx.hypot(dy);
            let mut alpha = 0.0_f32;

            // Four-pointed ring.
            if dist > inner && dist < radius {
                let star = (dy.atan2(dx) * 2.0).cos().abs();
                let star_radius = inner + (radius - inner) * star;
                if dist < star_radius {
                    let edge = (star_radius - dist) / (star_radius - inner * 0.8);
                    alpha = (edge * 0.15).min(0.15);
                }
            }

            // Center dot.
            if dist < radius * 0.2 {
                alpha = alpha.max((1.0 - dist / (radius * 0.2)) * 0.12);
            }
            alpha
        })
    }

    /// Resample to a `size` x `size` tile. Returns a copy when the size
    /// already matches.
    #[must_use]
    pub fn resized(&self, size: u32) -> Self {
        if self.size == size {
            return self.clone();
        }
        if self.size == 0 {
            return Self::from_fn(size, |_, _| 0.0);
        }

        let src: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_fn(self.size, self.size, |x, y| Luma([self.get(x, y)]));
        let out = imageops::resize(&src, size, size, FilterType::Triangle);
        let values = out.into_raw().into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
        Self { size, values }
    }

    /// Tile edge length in pixels.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Opacity at tile coordinate `(x, y)`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.size + x) as usize]
    }

    /// All opacities, row-major.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Lazily loads and memoizes one [`AlphaMap`] per tile size.
///
/// Reference tiles are read from `<asset_dir>/wm-alpha-<size>.png`. A missing
/// or unreadable tile degrades to [`AlphaMap::fallback`].
#[derive(Debug, Default)]
pub struct AlphaMapCache {
    asset_dir: Option<PathBuf>,
    small: OnceLock<Arc<AlphaMap>>,
    large: OnceLock<Arc<AlphaMap>>,
}

impl AlphaMapCache {
    /// Create a cache reading reference tiles from `asset_dir`.
    #[must_use]
    pub fn new(asset_dir: Option<PathBuf>) -> Self {
        Self {
            asset_dir,
            ..Self::default()
        }
    }

    /// Create a cache that already holds both maps.
    ///
    /// A map whose size does not match its slot is resampled to
    /// [`WatermarkSize::pixels`].
    #[must_use]
    pub fn preloaded(small: AlphaMap, large: AlphaMap) -> Self {
        let cache = Self::default();
        let _ = cache.small.set(Arc::new(fit_to_slot(small, WatermarkSize::Small)));
        let _ = cache.large.set(Arc::new(fit_to_slot(large, WatermarkSize::Large)));
        cache
    }

    /// The map for `size`, loading it on first use.
    pub fn alpha_map(&self, size: WatermarkSize) -> Arc<AlphaMap> {
        let slot = match size {
            WatermarkSize::Small => &self.small,
            WatermarkSize::Large => &self.large,
        };
        Arc::clone(slot.get_or_init(|| Arc::new(self.load(size))))
    }

    fn load(&self, size: WatermarkSize) -> AlphaMap {
        let Some(dir) = &self.asset_dir else {
            tracing::debug!("no alpha map directory, using fallback {}px map", size.pixels());
            return AlphaMap::fallback(size);
        };

        let path = dir.join(format!("wm-alpha-{}.png", size.pixels()));
        match read_tile(&path, size.pixels()) {
            Ok(map) => {
                tracing::debug!("loaded alpha map from {}", path.display());
                map
            }
            Err(e) => {
                tracing::warn!("failed to load alpha map {}: {e}", path.display());
                AlphaMap::fallback(size)
            }
        }
    }
}

fn fit_to_slot(map: AlphaMap, size: WatermarkSize) -> AlphaMap {
    let px = size.pixels();
    if map.size() == px {
        return map;
    }
    tracing::warn!("resampling {}px alpha map to {px}px", map.size());
    map.resized(px)
}

fn read_tile(path: &Path, size: u32) -> Result<AlphaMap> {
    let bytes = std::fs::read(path)?;
    AlphaMap::from_png(&bytes, size)
}
