//! Remove watermarks and unwanted objects from images, entirely on-device.
//!
//! Three engines live here:
//!
//! - [`editor::Editor`]: a brush-mask editor with bounded undo/redo that sends
//!   each finished stroke through a LaMa inpainting network.
//! - [`inpaint`] and [`model`]: the fixed-size tensor pipeline around that
//!   network, plus download, caching, and single-flight loading of the model.
//! - [`watermark::WatermarkEngine`]: detects the semi-transparent white
//!   overlay in the bottom-right corner and reverses its alpha blend.
//!
//! Inference runs on a background thread behind [`worker::WorkerHandle`], so
//! the interactive side only ever awaits.
//!
//! # Quick Start
//!
//! ```no_run
//! use mark_eraser::{Editor, EditorOptions, ModelConfig, ModelManager, Point, WatermarkEngine, WorkerHandle};
//!
//! # async fn run() -> mark_eraser::Result<()> {
//! let worker = WorkerHandle::spawn(ModelManager::new(&ModelConfig::default()))?;
//! let mut editor = Editor::new(worker, WatermarkEngine::new(None), EditorOptions::default(), (1280.0, 800.0));
//!
//! editor.open("photo.png".as_ref())?;
//! editor.ensure_model_loaded(|p| println!("loading {:.0}%", p * 100.0)).await?;
//!
//! editor.begin_stroke(Point::new(120.0, 80.0));
//! editor.stroke_to(Point::new(180.0, 90.0));
//! editor.end_stroke().await?;
//!
//! std::fs::write("cleaned.png", editor.download()?)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Watermark removal
//!
//! Detection checks that the tile region is brightened the way the known
//! alpha map predicts. Images without a detected overlay are left alone.
//!
//! ```no_run
//! use mark_eraser::WatermarkEngine;
//!
//! let engine = WatermarkEngine::new(None);
//! let img = image::open("photo.jpg").unwrap().to_rgba8();
//! match engine.detect_and_remove(&img) {
//!     Some((cleaned, found)) => {
//!         println!("removed, confidence {:.0}%", found.confidence * 100.0);
//!         cleaned.save("cleaned.png").unwrap();
//!     }
//!     None => println!("no watermark"),
//! }
//! ```

#![deny(missing_docs)]

pub mod editor;
pub mod error;
pub mod export;
pub mod inpaint;
pub mod model;
pub mod raster;
pub mod watermark;
pub mod worker;

pub use editor::{Editor, EditorOptions, InpaintService, StrokeOutcome};
pub use error::{Error, Result};
pub use export::{default_output_path, is_supported_image, save_image};
pub use model::{ModelConfig, ModelManager, ModelResource};
pub use raster::Point;
pub use watermark::{DetectionResult, ProcessOptions, ProcessResult, WatermarkEngine, WatermarkSize};
pub use worker::{CancelToken, WorkerHandle};
