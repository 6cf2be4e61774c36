//! Lifecycle of the inpainting network.
//!
//! [`ModelManager`] moves through `Unloaded -> Loading -> Ready`. A failed
//! load falls back to `Unloaded` so the next call retries from scratch.
//! Callers that arrive while a load is in flight subscribe to it instead of
//! starting another, so at most one fetch happens however many callers race.

pub mod cache;
pub mod fetch;

use std::path::PathBuf;
use std::sync::Arc;

use image::{GrayImage, RgbaImage};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::inpaint::{self, InpaintModel, OnnxFactory, SessionFactory};

pub use cache::{DiskCache, ModelCache};
pub use fetch::{HttpFetcher, ModelFetcher};

/// Canonical download location of the LaMa fp32 network.
pub const DEFAULT_MODEL_URL: &str = "https://cdn.isboyjc.com/models/lama/lama_fp32.onnx";

const PROGRESS_CACHE_HIT: f32 = 0.3;
const PROGRESS_DOWNLOAD_START: f32 = 0.1;
const PROGRESS_DOWNLOAD_SPAN: f32 = 0.6;
const PROGRESS_DOWNLOADED: f32 = 0.75;
const PROGRESS_FETCHED: f32 = 0.8;
const PROGRESS_BUILDING: f32 = 0.85;
const PROGRESS_READY: f32 = 1.0;

/// Where the network comes from and how it runs.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Download URL, also the persistent cache key.
    pub url: String,
    /// Cache directory; `None` uses the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Runtime intra-op threads; 0 lets the runtime decide.
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_MODEL_URL.to_string(),
            cache_dir: None,
            intra_threads: 0,
        }
    }
}

/// A loaded inference session.
///
/// Calls to [`ModelResource::inpaint`] are serialized: a second caller waits
/// for the first to finish.
pub struct ModelResource {
    model: Mutex<Box<dyn InpaintModel>>,
}

impl std::fmt::Debug for ModelResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResource").finish_non_exhaustive()
    }
}

impl ModelResource {
    /// Wrap a ready session.
    #[must_use]
    pub fn new(model: Box<dyn InpaintModel>) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }

    /// Run the full inpainting pipeline. Blocks for the duration of inference.
    ///
    /// # Errors
    ///
    /// See [`inpaint::inpaint`].
    pub fn inpaint(&self, image: &RgbaImage, mask: &GrayImage) -> Result<RgbaImage> {
        let mut model = self.model.lock();
        inpaint::inpaint(model.as_mut(), image, mask)
    }
}

#[derive(Clone)]
enum LoadStatus {
    Progress(f32),
    Done(std::result::Result<Arc<ModelResource>, String>),
}

enum LoadState {
    Unloaded,
    Loading(watch::Receiver<LoadStatus>),
    Ready(Arc<ModelResource>),
}

enum Subscription {
    Ready(Arc<ModelResource>),
    Wait(watch::Receiver<LoadStatus>),
}

struct Inner {
    url: String,
    fetcher: Arc<dyn ModelFetcher>,
    cache: Option<Arc<dyn ModelCache>>,
    factory: Arc<dyn SessionFactory>,
    state: Mutex<LoadState>,
}

/// Owns the process-wide [`ModelResource`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ModelManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("url", &self.inner.url)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    /// Manager using HTTP download, the on-disk cache, and ONNX Runtime.
    #[must_use]
    pub fn new(config: &ModelConfig) -> Self {
        let cache = config
            .cache_dir
            .clone()
            .map(DiskCache::new)
            .or_else(DiskCache::platform_default)
            .map(|c| Arc::new(c) as Arc<dyn ModelCache>);
        if cache.is_none() {
            tracing::warn!("no cache directory available, model will be downloaded every run");
        }
        Self::with_parts(
            config.url.clone(),
            Arc::new(HttpFetcher::default()),
            cache,
            Arc::new(OnnxFactory::new(config.intra_threads)),
        )
    }

    /// Manager over explicit collaborators.
    #[must_use]
    pub fn with_parts(
        url: impl Into<String>,
        fetcher: Arc<dyn ModelFetcher>,
        cache: Option<Arc<dyn ModelCache>>,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                fetcher,
                cache,
                factory,
                state: Mutex::new(LoadState::Unloaded),
            }),
        }
    }

    /// Cache key and download URL of the managed model.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Whether the model bytes are already in the persistent cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.inner
            .cache
            .as_ref()
            .is_some_and(|c| c.contains(&self.inner.url))
    }

    /// Whether a session is ready.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(*self.inner.state.lock(), LoadState::Ready(_))
    }

    /// Drop the ready session. Returns `false` if nothing was loaded.
    ///
    /// An in-flight load is left alone. Holders of the previous
    /// [`ModelResource`] keep it alive until they drop it.
    pub fn unload(&self) -> bool {
        let mut state = self.inner.state.lock();
        if matches!(*state, LoadState::Ready(_)) {
            *state = LoadState::Unloaded;
            tracing::info!("model unloaded");
            true
        } else {
            false
        }
    }

    /// Return the ready session, loading it first if needed.
    ///
    /// `progress` receives non-decreasing fractions in `[0, 1]` and ends with
    /// `1.0` on success. Concurrent callers share one load and all observe
    /// its outcome. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if fetching or session construction fails.
    /// The manager returns to the unloaded state, so calling again retries.
    pub async fn ensure_loaded(&self, progress: impl Fn(f32) + Send) -> Result<Arc<ModelResource>> {
        let mut rx = match self.subscribe() {
            Subscription::Ready(resource) => {
                progress(PROGRESS_READY);
                return Ok(resource);
            }
            Subscription::Wait(rx) => rx,
        };

        let mut last = 0.0_f32;
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                LoadStatus::Progress(p) => {
                    if p > last {
                        last = p;
                        progress(p);
                    }
                }
                LoadStatus::Done(Ok(resource)) => {
                    progress(PROGRESS_READY);
                    return Ok(resource);
                }
                LoadStatus::Done(Err(message)) => return Err(Error::ModelLoad(message)),
            }
            if rx.changed().await.is_err() {
                return Err(Error::ModelLoad("load aborted".to_string()));
            }
        }
    }

    fn subscribe(&self) -> Subscription {
        let mut state = self.inner.state.lock();
        match &*state {
            LoadState::Ready(resource) => return Subscription::Ready(Arc::clone(resource)),
            // A loader that vanished without reporting counts as unloaded.
            LoadState::Loading(rx) if rx.has_changed().is_ok() => {
                return Subscription::Wait(rx.clone());
            }
            LoadState::Loading(_) | LoadState::Unloaded => {}
        }

        let (tx, rx) = watch::channel(LoadStatus::Progress(0.0));
        *state = LoadState::Loading(rx.clone());
        drop(state);

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.run_load(&tx));
        Subscription::Wait(rx)
    }
}

impl Inner {
    fn run_load(&self, tx: &watch::Sender<LoadStatus>) {
        let _span = tracing::info_span!("load_model", url = %self.url).entered();

        let report = |p: f32| {
            tx.send_replace(LoadStatus::Progress(p));
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.load(&report)))
            .unwrap_or_else(|_| Err(Error::ModelLoad("model loader panicked".to_string())));

        match result {
            Ok(resource) => {
                let resource = Arc::new(resource);
                *self.state.lock() = LoadState::Ready(Arc::clone(&resource));
                tracing::info!("model ready");
                tx.send_replace(LoadStatus::Done(Ok(resource)));
            }
            Err(e) => {
                *self.state.lock() = LoadState::Unloaded;
                tracing::warn!("model load failed: {e}");
                tx.send_replace(LoadStatus::Done(Err(error_message(e))));
            }
        }
    }

    fn load(&self, progress: &dyn Fn(f32)) -> Result<ModelResource> {
        let cached = self.cache.as_ref().and_then(|c| c.get(&self.url));
        let bytes = if let Some(bytes) = cached {
            tracing::info!(bytes = bytes.len(), "model loaded from cache");
            progress(PROGRESS_CACHE_HIT);
            bytes
        } else {
            tracing::info!("model not cached, downloading");
            progress(PROGRESS_DOWNLOAD_START);
            let bytes = self.fetcher.fetch(&self.url, &|fraction| {
                progress(PROGRESS_DOWNLOAD_START + PROGRESS_DOWNLOAD_SPAN * fraction.clamp(0.0, 1.0));
            })?;
            progress(PROGRESS_DOWNLOADED);
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.put(&self.url, &bytes) {
                    tracing::warn!("failed to cache model, continuing in memory: {e}");
                }
            }
            bytes
        };
        progress(PROGRESS_FETCHED);

        progress(PROGRESS_BUILDING);
        let model = self.factory.build(&bytes)?;
        Ok(ModelResource::new(model))
    }
}

/// Message for a failed load, without repeating the `ModelLoad` prefix.
fn error_message(e: Error) -> String {
    match e {
        Error::ModelLoad(message) => message,
        other => other.to_string(),
    }
}
