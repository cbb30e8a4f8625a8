//! ABOUTME: Clip fetcher that streams Frigate event clips to transient local files
//! ABOUTME: Linear backoff retries, terminal 404 handling and guaranteed file cleanup

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Clip download errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Frigate has no clip for this event; retrying cannot help
    #[error("Clip not found at {url} (after {attempts} attempt(s))")]
    NotFound { url: String, attempts: u32 },

    #[error("Failed to download clip from {url} after {attempts} attempts")]
    Exhausted { url: String, attempts: u32 },

    #[error("Clip download from {url} cancelled after {attempts} attempt(s)")]
    Cancelled { url: String, attempts: u32 },

    #[error("Clip storage error: {0}")]
    Storage(#[from] io::Error),
}

impl FetchError {
    /// Number of download attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::NotFound { attempts, .. }
            | FetchError::Exhausted { attempts, .. }
            | FetchError::Cancelled { attempts, .. } => *attempts,
            FetchError::Storage(_) => 0,
        }
    }
}

impl From<FetchError> for fg_core::Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound { .. } => fg_core::Error::NotFound(err.to_string()),
            FetchError::Storage(io_err) => fg_core::Error::Io(io_err),
            other => fg_core::Error::External(other.to_string()),
        }
    }
}

/// Retry configuration for clip downloads
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Per-attempt request timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Process-local temp directory shared by every fetch of one handler
#[derive(Debug)]
pub struct ClipStore {
    dir: TempDir,
}

impl ClipStore {
    /// Create the directory under the system temp location
    pub fn create(prefix: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        debug!(path = %dir.path().display(), "Created clip directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create an empty file for one download of `url`.
    ///
    /// Names start with a hash of the URL but carry a random part, so two fetches of
    /// the same event never share a file.
    pub fn reserve(&self, url: &str) -> io::Result<PathBuf> {
        let digest = Sha256::digest(url.as_bytes());
        let file = tempfile::Builder::new()
            .prefix(&format!("{}-", &hex::encode(digest)[..16]))
            .suffix(".mp4")
            .tempfile_in(self.dir.path())?;
        file.into_temp_path().keep().map_err(|e| e.error)
    }

    /// Remove every file and then the directory itself
    pub async fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        let result = tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        match &result {
            Ok(()) => debug!(path = %path.display(), "Removed clip directory"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to remove clip directory"),
        }
        result
    }
}

/// A downloaded clip owned by exactly one pipeline run.
///
/// The backing file is deleted by [`ClipHandle::remove`] or, failing that, on drop.
#[derive(Debug)]
pub struct ClipHandle {
    local_path: PathBuf,
    source_url: String,
    attempts: u32,
    removed: bool,
}

impl ClipHandle {
    pub fn path(&self) -> &Path {
        &self.local_path
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Attempts it took to download this clip
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delete the backing file
    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_file(&self.local_path).await {
            Ok(()) => {
                debug!(path = %self.local_path.display(), "Removed clip file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ClipHandle {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.local_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.local_path.display(), error = %e, "Failed to remove clip file");
            }
        }
    }
}

/// Result of a single download attempt
enum Attempt {
    Downloaded(u64),
    NotFound,
    Retry,
}

/// Downloads event clips into a [`ClipStore`]
#[derive(Debug, Clone)]
pub struct ClipFetcher {
    store: Arc<ClipStore>,
    policy: RetryPolicy,
}

impl ClipFetcher {
    pub fn new(store: Arc<ClipStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Download the clip of `event_id` from the Frigate instance at `base_url`
    pub async fn fetch(
        &self,
        event_id: &str,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ClipHandle, FetchError> {
        let url = crate::clip_url(base_url, event_id);
        self.fetch_url(&url, cancel).await
    }

    /// Download `url` with retries
    pub async fn fetch_url(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ClipHandle, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        // Owns the reserved file from here on; dropping it on any error path deletes it
        let mut clip = ClipHandle {
            local_path: self.store.reserve(url)?,
            source_url: url.to_string(),
            attempts: 0,
            removed: false,
        };

        for attempt in 1..=max_attempts {
            debug!(
                url = %url,
                path = %clip.local_path.display(),
                attempt = attempt,
                max_attempts = max_attempts,
                "Downloading clip"
            );

            clip.attempts = attempt;
            match self.download_once(url, &clip.local_path).await {
                Attempt::Downloaded(bytes) => {
                    info!(url = %url, bytes = bytes, attempt = attempt, "Downloaded clip");
                    return Ok(clip);
                }
                Attempt::NotFound => {
                    error!(url = %url, "Clip not found (404)");
                    return Err(FetchError::NotFound {
                        url: url.to_string(),
                        attempts: attempt,
                    });
                }
                Attempt::Retry => {}
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_for_attempt(attempt);
                debug!(url = %url, delay_ms = delay.as_millis() as u64, "Retrying clip download after delay");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(FetchError::Cancelled { url: url.to_string(), attempts: attempt });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        error!(url = %url, attempts = max_attempts, "Failed to download clip after all attempts");
        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: max_attempts,
        })
    }

    /// One attempt on a fresh HTTP session; never leaves a partial file behind
    async fn download_once(&self, url: &str, path: &Path) -> Attempt {
        let client = match Client::builder().timeout(self.policy.timeout).build() {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Failed to create HTTP client");
                return Attempt::Retry;
            }
        };

        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(url = %url, "Timeout downloading clip");
                return Attempt::Retry;
            }
            Err(e) => {
                error!(url = %url, error = %e, "Error downloading clip");
                return Attempt::Retry;
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Attempt::NotFound;
        }
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                warn!(url = %url, status = status.as_u16(), body = %body, "Server error downloading clip");
            } else {
                error!(url = %url, status = status.as_u16(), body = %body, "Unexpected status downloading clip");
            }
            return Attempt::Retry;
        }

        match stream_to_file(response, path).await {
            Ok(bytes) => Attempt::Downloaded(bytes),
            Err(e) => {
                warn!(url = %url, error = %e, "Clip stream interrupted");
                if let Err(e) = tokio::fs::remove_file(path).await {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "Failed to remove partial clip");
                    }
                }
                Attempt::Retry
            }
        }
    }
}

/// Stream the response body to `path` chunk by chunk
async fn stream_to_file(response: reqwest::Response, path: &Path) -> io::Result<u64> {
    let mut file = File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}
