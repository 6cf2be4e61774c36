//! Editing session: history, mask drawing, viewport, and the inpaint cycle.
//!
//! [`Editor`] owns the current image, its undo/redo [`History`], the brush
//! mask and the [`Viewport`]. When a stroke ends with a non-empty mask it hands
//! the image and mask to an [`InpaintService`], and commits the result as a new
//! history entry. A failed or cancelled cycle leaves history untouched.

pub mod history;
pub mod viewport;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use image::{GrayImage, RgbaImage};

use crate::error::{Error, Result};
use crate::export;
use crate::raster::{self, Point};
use crate::watermark::{DetectionResult, WatermarkEngine};
use crate::worker::{CancelToken, WorkerHandle};

pub use history::History;
pub use viewport::Viewport;

/// Asynchronous access to model loading and inference.
///
/// [`WorkerHandle`] is the production implementation.
pub trait InpaintService: Send + Sync {
    /// Make sure the model is ready, reporting progress in `[0, 1]`.
    fn ensure_model_loaded(&self, progress: impl Fn(f32) + Send) -> impl Future<Output = Result<()>> + Send;

    /// Inpaint `image` where `mask` is selected.
    fn inpaint(
        &self,
        image: RgbaImage,
        mask: GrayImage,
        cancel: CancelToken,
    ) -> impl Future<Output = Result<RgbaImage>> + Send;
}

impl InpaintService for WorkerHandle {
    fn ensure_model_loaded(&self, progress: impl Fn(f32) + Send) -> impl Future<Output = Result<()>> + Send {
        self.load_model(progress)
    }

    fn inpaint(
        &self,
        image: RgbaImage,
        mask: GrayImage,
        cancel: CancelToken,
    ) -> impl Future<Output = Result<RgbaImage>> + Send {
        self.process(image, mask, cancel)
    }
}

/// Tunables for an [`Editor`].
#[derive(Debug, Clone)]
pub struct EditorOptions {
    /// History length cap, original included.
    pub max_history: usize,
    /// Brush diameter for new editors.
    pub default_brush_size: u32,
    /// Smallest brush diameter.
    pub min_brush_size: u32,
    /// Largest brush diameter.
    pub max_brush_size: u32,
    /// Free space kept around the image when fitting it to the surface.
    pub fit_margin: f32,
    /// Run watermark detection/removal when an image is loaded.
    pub detect_watermark: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            max_history: 30,
            default_brush_size: 30,
            min_brush_size: 5,
            max_brush_size: 100,
            fit_margin: 48.0,
            detect_watermark: true,
        }
    }
}

/// What [`Editor::end_stroke`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeOutcome {
    /// Nothing was selected, so no inference ran.
    Skipped,
    /// The inpainted image was committed to history.
    Committed,
}

#[derive(Debug)]
struct Document {
    history: History,
    mask: GrayImage,
    viewport: Viewport,
    last_point: Option<Point>,
}

impl Document {
    fn contains(&self, p: Point) -> bool {
        let (w, h) = self.mask.dimensions();
        #[allow(clippy::cast_precision_loss)]
        let inside = p.x >= 0.0 && p.y >= 0.0 && p.x < w as f32 && p.y < h as f32;
        inside
    }

    fn clear_mask(&mut self) {
        self.mask.fill(0);
    }
}

/// Interactive editing state around one image.
#[derive(Debug)]
pub struct Editor<S> {
    service: S,
    watermark: WatermarkEngine,
    options: EditorOptions,
    doc: Option<Document>,
    surface: (f32, f32),
    brush_size: u32,
    show_comparison: bool,
    comparison_position: f32,
    cancel: CancelToken,
}

impl<S: InpaintService> Editor<S> {
    /// Editor with no image, drawing on a `surface` of the given size.
    #[must_use]
    pub fn new(service: S, watermark: WatermarkEngine, options: EditorOptions, surface: (f32, f32)) -> Self {
        let brush_size = options
            .default_brush_size
            .clamp(options.min_brush_size, options.max_brush_size);
        Self {
            service,
            watermark,
            options,
            doc: None,
            surface,
            brush_size,
            show_comparison: false,
            comparison_position: 50.0,
            cancel: CancelToken::new(),
        }
    }

    /// Replace the session with `image` as the original.
    ///
    /// With watermark detection on, a detected overlay is removed and the
    /// cleaned image is committed as its own history entry. Returns that
    /// detection, or `None` when nothing was removed.
    pub fn load_image(&mut self, image: RgbaImage) -> Option<DetectionResult> {
        let (width, height) = image.dimensions();
        let viewport = Viewport::fitted(width, height, self.surface, self.options.fit_margin);
        let cleaned = if self.options.detect_watermark {
            self.detect_and_remove_watermark(&image)
        } else {
            None
        };

        self.doc = Some(Document {
            history: History::new(Arc::new(image), self.options.max_history),
            mask: GrayImage::new(width, height),
            viewport,
            last_point: None,
        });
        self.show_comparison = false;
        self.comparison_position = 50.0;
        tracing::info!(width, height, "image loaded");

        let (cleaned, detection) = cleaned?;
        tracing::info!(confidence = detection.confidence, "watermark removed on load");
        self.commit(cleaned);
        Some(detection)
    }

    /// Decode `path` and [`load_image`](Self::load_image) it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn open(&mut self, path: &Path) -> Result<Option<DetectionResult>> {
        let image = export::load_rgba(path)?;
        Ok(self.load_image(image))
    }

    /// Detect and remove the watermark overlay from `image`.
    ///
    /// Returns `None` when detection stays below threshold.
    #[must_use]
    pub fn detect_and_remove_watermark(&self, image: &RgbaImage) -> Option<(RgbaImage, DetectionResult)> {
        self.watermark.detect_and_remove(image)
    }

    /// Load the model through the service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if loading fails; calling again retries.
    pub async fn ensure_model_loaded(&self, progress: impl Fn(f32) + Send) -> Result<()> {
        self.service.ensure_model_loaded(progress).await
    }

    // Strokes

    /// Start a stroke at `p` and paint a dot there.
    ///
    /// Returns `false`, painting nothing, without an image or when `p` lies
    /// outside the image.
    pub fn begin_stroke(&mut self, p: Point) -> bool {
        let diameter = self.brush_diameter();
        let Some(doc) = self.doc.as_mut() else {
            return false;
        };
        if !doc.contains(p) {
            return false;
        }
        raster::stamp_circle(&mut doc.mask, p, diameter);
        doc.last_point = Some(p);
        true
    }

    /// Paint a dot at `p` if it lies inside the image.
    pub fn paint_point(&mut self, p: Point) {
        let diameter = self.brush_diameter();
        if let Some(doc) = self.doc.as_mut() {
            if doc.contains(p) {
                raster::stamp_circle(&mut doc.mask, p, diameter);
            }
        }
    }

    /// Paint a capsule from `a` to `b`. Skipped when `b` lies outside the image.
    pub fn paint_segment(&mut self, a: Point, b: Point) {
        let diameter = self.brush_diameter();
        if let Some(doc) = self.doc.as_mut() {
            if doc.contains(b) {
                raster::stroke_segment(&mut doc.mask, a, b, diameter);
            }
        }
    }

    /// Extend the active stroke to `p`. The stroke position advances even
    /// when the segment is skipped for leaving the image.
    pub fn stroke_to(&mut self, p: Point) {
        let Some(last) = self.doc.as_ref().and_then(|d| d.last_point) else {
            return;
        };
        self.paint_segment(last, p);
        if let Some(doc) = self.doc.as_mut() {
            doc.last_point = Some(p);
        }
    }

    /// Whether a stroke is in progress.
    #[must_use]
    pub fn is_drawing(&self) -> bool {
        self.doc.as_ref().is_some_and(|d| d.last_point.is_some())
    }

    /// Finish the stroke and inpaint the selection.
    ///
    /// An empty mask is not an error: nothing runs and the result is
    /// [`StrokeOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Propagates the service's failure. History and the mask are unchanged
    /// in that case, so the same selection can be retried.
    pub async fn end_stroke(&mut self) -> Result<StrokeOutcome> {
        if let Some(doc) = self.doc.as_mut() {
            doc.last_point = None;
        }
        self.process_mask().await
    }

    /// Inpaint the current selection, if any, and commit the result.
    ///
    /// The returned future borrows the editor mutably until it resolves, so
    /// the mask cannot be painted while a cycle is in flight:
    ///
    /// ```compile_fail
    /// # use mark_eraser::{Editor, Point, WorkerHandle};
    /// # async fn cycle(editor: &mut Editor<WorkerHandle>) {
    /// let pending = editor.process_mask();
    /// editor.paint_point(Point::new(1.0, 1.0));
    /// let _ = pending.await;
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Editor::end_stroke`].
    pub async fn process_mask(&mut self) -> Result<StrokeOutcome> {
        let Some(doc) = self.doc.as_ref() else {
            return Err(Error::NoImage);
        };
        if !raster::has_selection(&doc.mask) {
            tracing::debug!("empty mask, skipping inpaint");
            return Ok(StrokeOutcome::Skipped);
        }

        let image = RgbaImage::clone(doc.history.current());
        let mask = doc.mask.clone();
        let cancel = self.cancel.clone();

        let result = self.service.inpaint(image, mask, cancel.clone()).await;

        // A fresh token for the next cycle; the old one may already be cancelled.
        self.cancel = CancelToken::new();
        let output = result?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.commit(output);
        Ok(StrokeOutcome::Committed)
    }

    /// Token that cancels the current (or next) inpaint cycle.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    // History

    /// Push `image` as the newest entry, drop any redo tail, and clear the mask.
    pub fn commit(&mut self, image: RgbaImage) {
        if let Some(doc) = self.doc.as_mut() {
            doc.history.push(Arc::new(image));
            doc.clear_mask();
            tracing::info!(
                index = doc.history.index(),
                len = doc.history.len(),
                "committed edit"
            );
        }
    }

    /// Step back one entry and clear the mask.
    pub fn undo(&mut self) -> bool {
        self.doc.as_mut().is_some_and(|doc| {
            let moved = doc.history.undo();
            doc.clear_mask();
            moved
        })
    }

    /// Step forward one entry and clear the mask.
    pub fn redo(&mut self) -> bool {
        self.doc.as_mut().is_some_and(|doc| {
            let moved = doc.history.redo();
            doc.clear_mask();
            moved
        })
    }

    /// Whether [`Editor::undo`] would move.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.doc.as_ref().is_some_and(|d| d.history.can_undo())
    }

    /// Whether [`Editor::redo`] would move.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.doc.as_ref().is_some_and(|d| d.history.can_redo())
    }

    /// Back to the original: history, mask, and view are reset.
    pub fn reset(&mut self) {
        if let Some(doc) = self.doc.as_mut() {
            doc.history.reset();
            doc.clear_mask();
            doc.viewport.reset();
            doc.last_point = None;
        }
        self.show_comparison = false;
    }

    // Accessors

    /// The image under the history cursor.
    #[must_use]
    pub fn current_image(&self) -> Option<&Arc<RgbaImage>> {
        self.doc.as_ref().map(|d| d.history.current())
    }

    /// The image as first loaded.
    #[must_use]
    pub fn original_image(&self) -> Option<&Arc<RgbaImage>> {
        self.doc.as_ref().map(|d| d.history.original())
    }

    /// The undo/redo history.
    #[must_use]
    pub fn history(&self) -> Option<&History> {
        self.doc.as_ref().map(|d| &d.history)
    }

    /// The brush mask.
    #[must_use]
    pub fn mask(&self) -> Option<&GrayImage> {
        self.doc.as_ref().map(|d| &d.mask)
    }

    // Export

    /// The current image as lossless PNG bytes at full resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoImage`] without an image, or an encoding error.
    pub fn download(&self) -> Result<Vec<u8>> {
        let image = self.current_image().ok_or(Error::NoImage)?;
        export::encode_png(image)
    }

    /// Write the current image to `path`, format chosen by extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoImage`] without an image, or a save error.
    pub fn save(&self, path: &Path) -> Result<()> {
        let image = self.current_image().ok_or(Error::NoImage)?;
        export::save_image(image, path)
    }

    // View

    /// The viewport, if an image is loaded.
    #[must_use]
    pub fn viewport(&self) -> Option<&Viewport> {
        self.doc.as_ref().map(|d| &d.viewport)
    }

    /// Set zoom, clamped around the fit zoom.
    pub fn set_zoom(&mut self, zoom: f32) {
        if let Some(doc) = self.doc.as_mut() {
            doc.viewport.set_zoom(zoom);
        }
    }

    /// Set the pan offset.
    pub fn set_pan(&mut self, x: f32, y: f32) {
        if let Some(doc) = self.doc.as_mut() {
            doc.viewport.set_pan(x, y);
        }
    }

    /// Back to fit zoom and no pan.
    pub fn reset_view(&mut self) {
        if let Some(doc) = self.doc.as_mut() {
            doc.viewport.reset();
        }
    }

    /// Resize the drawing surface and refit the view.
    pub fn set_surface(&mut self, width: f32, height: f32) {
        self.surface = (width, height);
        let margin = self.options.fit_margin;
        if let Some(doc) = self.doc.as_mut() {
            let (w, h) = doc.mask.dimensions();
            doc.viewport = Viewport::fitted(w, h, self.surface, margin);
        }
    }

    // Brush and comparison

    /// Brush diameter in image pixels.
    #[must_use]
    pub fn brush_size(&self) -> u32 {
        self.brush_size
    }

    /// Set the brush diameter, clamped to the configured range.
    pub fn set_brush_size(&mut self, size: u32) {
        self.brush_size = size.clamp(self.options.min_brush_size, self.options.max_brush_size);
    }

    #[allow(clippy::cast_precision_loss)]
    fn brush_diameter(&self) -> f32 {
        self.brush_size as f32
    }

    /// Flip the before/after comparison view.
    pub fn toggle_comparison(&mut self) {
        self.show_comparison = !self.show_comparison;
    }

    /// Whether the comparison view is shown.
    #[must_use]
    pub fn show_comparison(&self) -> bool {
        self.show_comparison
    }

    /// Set the comparison divider, clamped to `[0, 100]` percent.
    pub fn set_comparison_position(&mut self, position: f32) {
        if position.is_finite() {
            self.comparison_position = position.clamp(0.0, 100.0);
        }
    }

    /// Comparison divider in percent.
    #[must_use]
    pub fn comparison_position(&self) -> f32 {
        self.comparison_position
    }
}
