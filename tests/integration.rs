use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{GrayImage, Luma, Rgba, RgbaImage};
use ndarray::Array4;
use parking_lot::Mutex;

use mark_eraser::inpaint::{InpaintModel, SessionFactory};
use mark_eraser::model::{DiskCache, ModelCache, ModelFetcher};
use mark_eraser::watermark::{blending, watermark_config, AlphaMap, AlphaMapCache};
use mark_eraser::{
    CancelToken, Editor, EditorOptions, Error, ModelManager, Point, Result, StrokeOutcome,
    WatermarkEngine, WatermarkSize, WorkerHandle,
};

const URL: &str = "https://models.test/lama.onnx";

#[derive(Default)]
struct Counters {
    fetches: AtomicUsize,
    builds: AtomicUsize,
    infers: AtomicUsize,
}

struct TestFetcher {
    counters: Arc<Counters>,
    failures: AtomicUsize,
    delay: Duration,
}

impl TestFetcher {
    fn new(counters: &Arc<Counters>) -> Self {
        Self {
            counters: Arc::clone(counters),
            failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn failing(self, times: usize) -> Self {
        self.failures.store(times, Ordering::SeqCst);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl ModelFetcher for TestFetcher {
    fn fetch(&self, _url: &str, progress: &dyn Fn(f32)) -> Result<Vec<u8>> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::ModelLoad("HTTP 503".to_string()));
        }
        progress(0.5);
        progress(1.0);
        Ok(b"lama weights".to_vec())
    }
}

/// Fills the canvas with mid gray in `[0, 1]` range.
struct GrayModel(Arc<Counters>);

impl InpaintModel for GrayModel {
    fn infer(&mut self, image: &Array4<f32>, _mask: &Array4<f32>) -> Result<Array4<f32>> {
        self.0.infers.fetch_add(1, Ordering::SeqCst);
        Ok(Array4::from_elem(image.raw_dim(), 0.5))
    }
}

struct GrayFactory(Arc<Counters>);

impl SessionFactory for GrayFactory {
    fn build(&self, model_bytes: &[u8]) -> Result<Box<dyn InpaintModel>> {
        assert_eq!(model_bytes, b"lama weights");
        self.0.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(GrayModel(Arc::clone(&self.0))))
    }
}

/// A cache whose writes always fail.
struct ReadOnlyCache;

impl ModelCache for ReadOnlyCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn put(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        )))
    }
}

fn manager_with(fetcher: TestFetcher, cache: Option<Arc<dyn ModelCache>>, counters: &Arc<Counters>) -> ModelManager {
    ModelManager::with_parts(
        URL,
        Arc::new(fetcher),
        cache,
        Arc::new(GrayFactory(Arc::clone(counters))),
    )
}

#[allow(clippy::cast_precision_loss)]
fn disc(size: u32) -> AlphaMap {
    let c = size as f32 / 2.0;
    let r = size as f32 / 3.0;
    AlphaMap::from_fn(size, |x, y| {
        let d = (x as f32 - c).hypot(y as f32 - c);
        if d < r {
            0.5 * (1.0 - d / r)
        } else {
            0.0
        }
    })
}

fn engine() -> WatermarkEngine {
    WatermarkEngine::with_cache(AlphaMapCache::preloaded(disc(48), disc(96)))
}

fn textured(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = u8::try_from((x / 7 + y / 5) % 60 + 40).unwrap_or(0);
        Rgba([v, v.saturating_add(10), v.saturating_add(20), 255])
    })
}

fn editor_over_worker(counters: &Arc<Counters>, width: u32, height: u32) -> Editor<WorkerHandle> {
    let worker = WorkerHandle::spawn(manager_with(TestFetcher::new(counters), None, counters)).unwrap();
    let options = EditorOptions {
        detect_watermark: false,
        ..EditorOptions::default()
    };
    let mut editor = Editor::new(worker, engine(), options, (1280.0, 800.0));
    editor.load_image(textured(width, height));
    editor
}

// Model manager

#[tokio::test]
async fn concurrent_loads_share_one_fetch() {
    let counters = Arc::new(Counters::default());
    let fetcher = TestFetcher::new(&counters).slow(Duration::from_millis(100));
    let manager = manager_with(fetcher, None, &counters);

    let (a, b) = tokio::join!(manager.ensure_loaded(|_| {}), manager.ensure_loaded(|_| {}));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(counters.builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_waiters_all_see_a_failed_load() {
    let counters = Arc::new(Counters::default());
    let fetcher = TestFetcher::new(&counters)
        .slow(Duration::from_millis(100))
        .failing(1);
    let manager = manager_with(fetcher, None, &counters);

    let (a, b) = tokio::join!(manager.ensure_loaded(|_| {}), manager.ensure_loaded(|_| {}));
    assert!(matches!(a, Err(Error::ModelLoad(ref m)) if m.contains("503")));
    assert!(matches!(b, Err(Error::ModelLoad(_))));
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
    assert!(!manager.is_loaded());
}

#[tokio::test]
async fn failed_load_is_retried_from_scratch() {
    let counters = Arc::new(Counters::default());
    let manager = manager_with(TestFetcher::new(&counters).failing(1), None, &counters);

    assert!(manager.ensure_loaded(|_| {}).await.is_err());
    assert!(!manager.is_loaded());

    manager.ensure_loaded(|_| {}).await.unwrap();
    assert!(manager.is_loaded());
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cache_hit_skips_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path());
    cache.put(URL, b"lama weights").unwrap();

    let counters = Arc::new(Counters::default());
    let manager = manager_with(TestFetcher::new(&counters), Some(Arc::new(cache)), &counters);
    assert!(manager.is_cached());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.ensure_loaded(move |p| sink.lock().push(p)).await.unwrap();

    assert_eq!(counters.fetches.load(Ordering::SeqCst), 0);
    let seen = seen.lock();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last().copied(), Some(1.0));
}

#[tokio::test]
async fn cache_miss_downloads_and_stores() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let manager = manager_with(
        TestFetcher::new(&counters),
        Some(Arc::new(DiskCache::new(dir.path().join("models")))),
        &counters,
    );
    assert!(!manager.is_cached());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.ensure_loaded(move |p| sink.lock().push(p)).await.unwrap();

    assert!(manager.is_cached());
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
    let seen = seen.lock();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last().copied(), Some(1.0));
}

#[tokio::test]
async fn cache_write_failure_is_not_fatal() {
    let counters = Arc::new(Counters::default());
    let manager = manager_with(TestFetcher::new(&counters), Some(Arc::new(ReadOnlyCache)), &counters);
    manager.ensure_loaded(|_| {}).await.unwrap();
    assert!(manager.is_loaded());
    assert!(!manager.is_cached());
}

// Worker

#[tokio::test]
async fn worker_load_reports_loaded_to_every_caller() {
    let counters = Arc::new(Counters::default());
    let fetcher = TestFetcher::new(&counters).slow(Duration::from_millis(50));
    let worker = WorkerHandle::spawn(manager_with(fetcher, None, &counters)).unwrap();

    let (a, b) = tokio::join!(worker.load_model(|_| {}), worker.load_model(|_| {}));
    a.unwrap();
    b.unwrap();
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn worker_output_differs_only_inside_the_mask() {
    let counters = Arc::new(Counters::default());
    let worker = WorkerHandle::spawn(manager_with(TestFetcher::new(&counters), None, &counters)).unwrap();

    let image = textured(1500, 700);
    let mask = GrayImage::from_fn(1500, 700, |x, y| {
        let v = u8::try_from((x * 31 + y * 17) % 256).unwrap_or(0);
        Luma([v])
    });
    let output = worker
        .process(image.clone(), mask.clone(), CancelToken::new())
        .await
        .unwrap();

    assert_eq!(output.dimensions(), image.dimensions());
    for (x, y, m) in mask.enumerate_pixels() {
        if m[0] <= 128 {
            assert_eq!(output.get_pixel(x, y), image.get_pixel(x, y), "({x},{y})");
        }
    }
}

#[tokio::test]
async fn mismatched_mask_is_rejected_by_the_worker() {
    let counters = Arc::new(Counters::default());
    let worker = WorkerHandle::spawn(manager_with(TestFetcher::new(&counters), None, &counters)).unwrap();
    let err = worker
        .process(RgbaImage::new(64, 64), GrayImage::new(32, 32), CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inference(ref m) if m.contains("32x32")));
    assert_eq!(counters.infers.load(Ordering::SeqCst), 0);
}

// Editor scenarios

#[tokio::test]
async fn empty_mask_never_reaches_inference() {
    let counters = Arc::new(Counters::default());
    let mut editor = editor_over_worker(&counters, 2000, 2000);

    assert_eq!(editor.end_stroke().await.unwrap(), StrokeOutcome::Skipped);
    assert_eq!(counters.infers.load(Ordering::SeqCst), 0);
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(editor.history().unwrap().len(), 1);
}

#[tokio::test]
async fn three_cycles_build_four_entries() {
    let counters = Arc::new(Counters::default());
    let mut editor = editor_over_worker(&counters, 640, 480);

    for i in 0..3u8 {
        let y = 100.0 + f32::from(i) * 100.0;
        assert!(editor.begin_stroke(Point::new(100.0, y)));
        editor.stroke_to(Point::new(300.0, y));
        assert_eq!(editor.end_stroke().await.unwrap(), StrokeOutcome::Committed);
        assert!(editor.can_undo());
        assert!(!editor.can_redo());
    }

    let history = editor.history().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history.index(), 3);
    assert_eq!(counters.infers.load(Ordering::SeqCst), 3);
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);

    assert!(editor.undo());
    assert!(editor.can_redo());

    // Committing after an undo drops the redo tail.
    editor.begin_stroke(Point::new(500.0, 50.0));
    editor.end_stroke().await.unwrap();
    assert_eq!(editor.history().unwrap().len(), 4);
    assert!(!editor.can_redo());
    assert!(!editor.redo());
}

#[tokio::test]
async fn cancelled_cycle_leaves_history_alone() {
    let counters = Arc::new(Counters::default());
    let mut editor = editor_over_worker(&counters, 320, 240);

    editor.cancel_handle().cancel();
    editor.begin_stroke(Point::new(50.0, 50.0));
    let err = editor.end_stroke().await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(editor.history().unwrap().len(), 1);

    // The next cycle gets a fresh token.
    assert_eq!(editor.process_mask().await.unwrap(), StrokeOutcome::Committed);
    assert_eq!(editor.history().unwrap().len(), 2);
}

// Watermark

fn stamped(base: &RgbaImage) -> RgbaImage {
    let (w, h) = base.dimensions();
    let cfg = watermark_config(w, h);
    let (x, y) = cfg.position(w, h).unwrap();
    blending::blend_watermark(base, &disc(cfg.size.pixels()), x, y)
}

#[test]
fn stamped_overlay_is_detected_and_flat_tile_is_not() {
    let engine = engine();
    let base = RgbaImage::from_pixel(1600, 1200, Rgba([60, 70, 80, 255]));

    let found = engine.detect(&stamped(&base));
    assert!(found.exists, "{found:?}");
    assert_eq!(found.size, Some(WatermarkSize::Large));
    assert_eq!(found.position, Some((1600 - 96 - 64, 1200 - 96 - 64)));

    assert!(!engine.detect(&base).exists);
}

#[test]
fn clean_image_load_leaves_history_unchanged() {
    let counters = Arc::new(Counters::default());
    let worker = WorkerHandle::spawn(manager_with(TestFetcher::new(&counters), None, &counters)).unwrap();
    let mut editor = Editor::new(worker, engine(), EditorOptions::default(), (1280.0, 800.0));

    assert!(editor.load_image(textured(800, 600)).is_none());
    assert_eq!(editor.history().unwrap().len(), 1);
    assert!(!editor.can_undo());
}

#[test]
fn watermark_removal_on_load_is_its_own_entry() {
    let counters = Arc::new(Counters::default());
    let worker = WorkerHandle::spawn(manager_with(TestFetcher::new(&counters), None, &counters)).unwrap();
    let mut editor = Editor::new(worker, engine(), EditorOptions::default(), (1280.0, 800.0));

    let base = RgbaImage::from_pixel(800, 600, Rgba([90, 90, 90, 255]));
    let marked = stamped(&base);
    let detection = editor.load_image(marked.clone()).unwrap();
    assert!(detection.confidence >= 0.75);

    let history = editor.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(**history.original(), marked);
    for (a, b) in history.current().pixels().zip(base.pixels()) {
        assert!((i32::from(a[0]) - i32::from(b[0])).abs() <= 1);
    }

    assert!(editor.undo());
    assert_eq!(**editor.current_image().unwrap(), marked);
}

#[test]
fn exported_png_round_trips_at_full_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let worker = WorkerHandle::spawn(manager_with(TestFetcher::new(&counters), None, &counters)).unwrap();
    let options = EditorOptions {
        detect_watermark: false,
        ..EditorOptions::default()
    };
    let mut editor = Editor::new(worker, engine(), options, (1280.0, 800.0));

    let source = dir.path().join("in.png");
    textured(333, 222).save(&source).unwrap();
    editor.open(&source).unwrap();

    let out = dir.path().join("out.png");
    editor.save(&out).unwrap();
    let decoded = image::open(&out).unwrap().to_rgba8();
    assert_eq!(decoded, textured(333, 222));
}
