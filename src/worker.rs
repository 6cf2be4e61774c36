//! Background execution context for model loading and inference.
//!
//! A dedicated thread runs its own Tokio runtime and serves requests from a
//! bounded mailbox. Every request carries an id and its own reply channel;
//! replies are tagged with the same id. If the worker faults before sending a
//! final reply, the reply channel closes and the caller gets
//! [`Error::WorkerUnavailable`] instead of waiting forever.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::{GrayImage, RgbaImage};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::model::ModelManager;

const MAILBOX_CAPACITY: usize = 16;
const THREAD_NAME: &str = "inpaint-worker";

/// Shared flag for abandoning a queued or running request.
///
/// Cancellation is checked before inference starts and again before the
/// result is delivered. Compute already running is not interrupted, but its
/// result is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every clone of this token as cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelToken::cancel`] has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Work the background context can do.
#[derive(Debug)]
pub enum Request {
    /// Make sure the model is loaded, streaming progress.
    LoadModel,
    /// Inpaint `image` where `mask` is selected.
    Process {
        /// Source pixels.
        image: RgbaImage,
        /// Selection, same dimensions as `image`.
        mask: GrayImage,
        /// Abandons the request when cancelled.
        cancel: CancelToken,
    },
}

/// A message from the background context.
#[derive(Debug)]
pub enum Response {
    /// Load progress in `[0, 1]`.
    Progress(f32),
    /// The model is ready.
    Loaded,
    /// Composed output of a process request.
    Result(RgbaImage),
    /// The request was cancelled.
    Cancelled,
    /// The model could not be loaded. Retryable.
    LoadError(String),
    /// Inference failed.
    Error(String),
}

/// A [`Response`] tagged with the id of the request it answers.
#[derive(Debug)]
pub struct Reply {
    /// Id of the originating request.
    pub id: u64,
    /// Payload.
    pub response: Response,
}

struct Envelope {
    id: u64,
    request: Request,
    reply: mpsc::UnboundedSender<Reply>,
}

/// Client side of the background context. Cheap to clone.
///
/// The worker thread exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    mailbox: mpsc::Sender<Envelope>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope").field("id", &self.id).finish_non_exhaustive()
    }
}

impl WorkerHandle {
    /// Start the worker thread serving requests against `manager`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread cannot be spawned.
    pub fn spawn(manager: ModelManager) -> Result<Self> {
        let (mailbox, rx) = mpsc::channel(MAILBOX_CAPACITY);

        std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!("failed to start worker runtime: {e}");
                        return;
                    }
                };
                runtime.block_on(serve(manager, rx));
                tracing::debug!("worker stopped");
            })?;

        Ok(Self {
            mailbox,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Ask the worker to load the model. `progress` is called on the caller's
    /// task as progress messages arrive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if loading fails, or
    /// [`Error::WorkerUnavailable`] if the worker is gone.
    pub async fn load_model(&self, progress: impl Fn(f32) + Send) -> Result<()> {
        let (id, mut replies) = self.submit(Request::LoadModel).await?;
        while let Some(reply) = replies.recv().await {
            debug_assert_eq!(reply.id, id);
            match reply.response {
                Response::Progress(p) => progress(p),
                Response::Loaded => return Ok(()),
                Response::LoadError(message) | Response::Error(message) => {
                    return Err(Error::ModelLoad(message));
                }
                Response::Cancelled => return Err(Error::Cancelled),
                Response::Result(_) => {
                    tracing::warn!(id, "unexpected result reply to load request");
                }
            }
        }
        Err(Error::WorkerUnavailable)
    }

    /// Run the inpainting pipeline in the background. Loads the model first
    /// if it is not ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if the model cannot be loaded,
    /// [`Error::Inference`] if inference fails,
    /// [`Error::Cancelled`] if `cancel` fired, or
    /// [`Error::WorkerUnavailable`] if the worker faulted or is gone.
    pub async fn process(&self, image: RgbaImage, mask: GrayImage, cancel: CancelToken) -> Result<RgbaImage> {
        let (id, mut replies) = self
            .submit(Request::Process { image, mask, cancel })
            .await?;
        while let Some(reply) = replies.recv().await {
            debug_assert_eq!(reply.id, id);
            match reply.response {
                Response::Result(image) => return Ok(image),
                Response::Cancelled => return Err(Error::Cancelled),
                Response::LoadError(message) => return Err(Error::ModelLoad(message)),
                Response::Error(message) => return Err(Error::Inference(message)),
                Response::Progress(_) | Response::Loaded => {}
            }
        }
        Err(Error::WorkerUnavailable)
    }

    async fn submit(&self, request: Request) -> Result<(u64, mpsc::UnboundedReceiver<Reply>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, replies) = mpsc::unbounded_channel();
        self.mailbox
            .send(Envelope { id, request, reply })
            .await
            .map_err(|_| Error::WorkerUnavailable)?;
        Ok((id, replies))
    }
}

async fn serve(manager: ModelManager, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        tokio::spawn(handle(manager.clone(), envelope));
    }
}

async fn handle(manager: ModelManager, envelope: Envelope) {
    let Envelope { id, request, reply } = envelope;
    let response = match request {
        Request::LoadModel => {
            let progress_tx = reply.clone();
            let result = manager
                .ensure_loaded(move |p| {
                    let _ = progress_tx.send(Reply {
                        id,
                        response: Response::Progress(p),
                    });
                })
                .await;
            match result {
                Ok(_) => Response::Loaded,
                Err(e) => failure(e),
            }
        }
        Request::Process { image, mask, cancel } => process(&manager, id, image, mask, &cancel).await,
    };

    if reply.send(Reply { id, response }).is_err() {
        tracing::debug!(id, "caller went away before the reply");
    }
}

async fn process(
    manager: &ModelManager,
    id: u64,
    image: RgbaImage,
    mask: GrayImage,
    cancel: &CancelToken,
) -> Response {
    if cancel.is_cancelled() {
        return Response::Cancelled;
    }

    let resource = match manager.ensure_loaded(|_| {}).await {
        Ok(resource) => resource,
        Err(e) => return failure(e),
    };
    if cancel.is_cancelled() {
        return Response::Cancelled;
    }

    tracing::debug!(id, width = image.width(), height = image.height(), "processing");
    let joined = tokio::task::spawn_blocking(move || resource.inpaint(&image, &mask)).await;
    match joined {
        Ok(Ok(_)) if cancel.is_cancelled() => {
            tracing::debug!(id, "discarding result of cancelled request");
            Response::Cancelled
        }
        Ok(Ok(output)) => Response::Result(output),
        Ok(Err(e)) => failure(e),
        Err(e) => {
            tracing::warn!(id, "inference task faulted: {e}");
            Response::Error(format!("inference task faulted: {e}"))
        }
    }
}

/// Reply for a failed request. The message drops the kind prefix, which the
/// caller restores when it rebuilds the [`Error`].
fn failure(e: Error) -> Response {
    match e {
        Error::ModelLoad(message) => Response::LoadError(message),
        Error::Inference(message) => Response::Error(message),
        other => Response::Error(other.to_string()),
    }
}
