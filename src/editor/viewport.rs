//! Zoom and pan of the displayed image.

/// Zoom is bounded to this multiple of the fit zoom, both ways.
const MIN_ZOOM_FACTOR: f32 = 0.25;
const MAX_ZOOM_FACTOR: f32 = 4.0;

/// Display transform. Zoom is absolute (1.0 = one image pixel per surface
/// pixel) and always within `[0.25 * fit, 4 * fit]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    fit: f32,
    zoom: f32,
    pan: (f32, f32),
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            fit: 1.0,
            zoom: 1.0,
            pan: (0.0, 0.0),
        }
    }
}

/// Largest zoom (capped at 1) that shows a `width x height` image on a
/// `surface` with `margin` pixels free on every side.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fit_zoom(width: u32, height: u32, surface: (f32, f32), margin: f32) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    let avail_w = (surface.0 - 2.0 * margin).max(1.0);
    let avail_h = (surface.1 - 2.0 * margin).max(1.0);
    (avail_w / width as f32).min(avail_h / height as f32).min(1.0)
}

impl Viewport {
    /// Viewport fitted to an image, with zoom at the fit level and no pan.
    #[must_use]
    pub fn fitted(width: u32, height: u32, surface: (f32, f32), margin: f32) -> Self {
        let fit = fit_zoom(width, height, surface, margin);
        Self {
            fit,
            zoom: fit,
            pan: (0.0, 0.0),
        }
    }

    /// The fit zoom this viewport was built for.
    #[must_use]
    pub fn fit(&self) -> f32 {
        self.fit
    }

    /// Current zoom.
    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Current pan offset in surface pixels.
    #[must_use]
    pub fn pan(&self) -> (f32, f32) {
        self.pan
    }

    /// Zoom relative to fit, e.g. `1.0` when fitted.
    #[must_use]
    pub fn relative_zoom(&self) -> f32 {
        self.zoom / self.fit
    }

    /// Set zoom, clamped to `[0.25 * fit, 4 * fit]`. Non-finite input is ignored.
    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom.is_finite() {
            self.zoom = zoom.clamp(self.fit * MIN_ZOOM_FACTOR, self.fit * MAX_ZOOM_FACTOR);
        }
    }

    /// Set pan offset.
    pub fn set_pan(&mut self, x: f32, y: f32) {
        if x.is_finite() && y.is_finite() {
            self.pan = (x, y);
        }
    }

    /// Back to fit zoom, centered.
    pub fn reset(&mut self) {
        self.zoom = self.fit;
        self.pan = (0.0, 0.0);
    }

    /// Map a surface position (relative to the surface center) to image
    /// coordinates for an image of `width x height`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_image(&self, surface_x: f32, surface_y: f32, width: u32, height: u32) -> (f32, f32) {
        let x = (surface_x - self.pan.0) / self.zoom + width as f32 / 2.0;
        let y = (surface_y - self.pan.1) / self.zoom + height as f32 / 2.0;
        (x, y)
    }
}
