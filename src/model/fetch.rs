//! Downloading model bytes with progress reporting.

use std::io::Read;
use std::time::Duration;

use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Retrieves model bytes from a URL.
///
/// Implementations block; the model manager calls them from a blocking
/// thread.
pub trait ModelFetcher: Send + Sync {
    /// Download `url`, reporting the received fraction in `[0, 1]` when the
    /// total size is known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] on network failure or a non-success status.
    fn fetch(&self, url: &str, progress: &dyn Fn(f32)) -> Result<Vec<u8>>;
}

/// HTTP(S) fetcher backed by `reqwest`'s blocking client.
///
/// There is no deadline for the whole download. A connection that does not
/// open within `connect_timeout`, or a response that stalls for longer than
/// `read_timeout` between chunks, fails the fetch.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpFetcher {
    /// Fetcher with explicit connect and stall limits.
    #[must_use]
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT, READ_TIMEOUT)
    }
}

fn load_error(e: impl std::fmt::Display) -> Error {
    Error::ModelLoad(e.to_string())
}

impl ModelFetcher for HttpFetcher {
    #[allow(clippy::cast_precision_loss)]
    fn fetch(&self, url: &str, progress: &dyn Fn(f32)) -> Result<Vec<u8>> {
        let _span = tracing::info_span!("fetch_model", url).entered();

        // The blocking client applies `timeout` to the headers and then to
        // each body read separately.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .build()
            .map_err(load_error)?;
        let mut response = client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(load_error)?;

        let total = response.content_length().filter(|n| *n > 0);
        tracing::info!(bytes = total, "downloading model");

        let capacity = total.and_then(|n| usize::try_from(n).ok()).unwrap_or(0);
        let mut bytes = Vec::with_capacity(capacity);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let n = response.read(&mut chunk).map_err(load_error)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            if let Some(total) = total {
                progress((bytes.len() as f32 / total as f32).min(1.0));
            }
        }

        if bytes.is_empty() {
            return Err(Error::ModelLoad(format!("empty response from {url}")));
        }
        tracing::info!(bytes = bytes.len(), "model downloaded");
        Ok(bytes)
    }
}
