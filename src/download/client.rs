//! HTTP client shared by extractors and downloaders.
//!
//! One [`HttpClient`] is created per run and cloned cheaply; it carries the
//! connection pool and the per-domain [`RateLimiter`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::ProgressBar;
use reqwest::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_LENGTH, HeaderMap};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::rate_limiter::RateLimiter;
use crate::user_agent;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl HttpClient {
    /// Creates a client with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend can't be set up.
    pub fn new(limiter: Arc<RateLimiter>) -> Result<Self, DownloadError> {
        Self::with_timeouts(limiter, CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit connect and read timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend can't be set up.
    pub fn with_timeouts(
        limiter: Arc<RateLimiter>,
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(DownloadError::ClientBuild)?;
        Ok(Self { client, limiter })
    }

    /// A client that never spaces requests.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend can't be set up.
    pub fn unthrottled() -> Result<Self, DownloadError> {
        Self::new(Arc::new(RateLimiter::disabled()))
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn send(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        self.limiter.acquire(url).await;

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "request failed");
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }

    /// Fetches a page as text.
    ///
    /// # Errors
    ///
    /// Network, timeout and non-2xx failures.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        self.get_text_with_headers(url, &[]).await
    }

    /// Fetches a page as text with extra request headers.
    ///
    /// # Errors
    ///
    /// Network, timeout and non-2xx failures.
    #[instrument(level = "debug", skip(self, headers))]
    pub async fn get_text_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<String, DownloadError> {
        let response = self.send(url, headers).await?;
        response
            .text()
            .await
            .map_err(|e| DownloadError::network(url, e))
    }

    /// Fetches and decodes a JSON document.
    ///
    /// # Errors
    ///
    /// Network, timeout and non-2xx failures, or [`DownloadError::Json`] when
    /// the body doesn't match `T`.
    #[instrument(level = "debug", skip(self, headers))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<T, DownloadError> {
        let body = self.get_text_with_headers(url, headers).await?;
        serde_json::from_str(&body).map_err(|e| DownloadError::json(url, e))
    }

    /// Streams `url` into `dest`, returning the number of bytes written.
    ///
    /// The partial file is removed on any failure, and when the returned future
    /// is dropped before it completes. When the server declared a
    /// `Content-Length` for an unencoded body and fewer bytes arrived, fails
    /// with [`DownloadError::ContentTooShort`].
    ///
    /// # Errors
    ///
    /// Network, timeout, non-2xx, IO and content-too-short failures.
    #[instrument(skip(self, progress), fields(dest = %dest.display()))]
    pub async fn download_chunked(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&ProgressBar>,
    ) -> Result<u64, DownloadError> {
        let response = self.send(url, &[]).await?;
        let expected = expected_length(response.headers());
        if let (Some(pb), Some(len)) = (progress, expected) {
            pb.set_length(len);
        }

        // declared before the file so the handle is closed first when dropped
        let partial = PartialFile::new(dest);
        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        let result = stream_to_file(&mut file, response, url, dest, progress).await;
        drop(file);

        let written = result.and_then(|written| check_complete(url, expected, written))?;
        partial.keep();
        debug!(bytes = written, "transfer complete");
        Ok(written)
    }
}

/// Deletes the file at `path` when dropped, unless [`PartialFile::keep`] was
/// called. Covers errors as well as a transfer future that is dropped midway.
struct PartialFile<'a> {
    path: &'a Path,
    keep: bool,
}

impl<'a> PartialFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove partial file"),
        }
    }
}

/// Declared body length, unless the body is content-encoded.
fn expected_length(headers: &HeaderMap) -> Option<u64> {
    if headers.contains_key(CONTENT_ENCODING) {
        return None;
    }
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn check_complete(url: &str, expected: Option<u64>, written: u64) -> Result<u64, DownloadError> {
    match expected {
        Some(expected) if written < expected => {
            Err(DownloadError::content_too_short(url, expected, written))
        }
        _ => Ok(written),
    }
}

async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
    progress: Option<&ProgressBar>,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        written += chunk.len() as u64;
        if let Some(pb) = progress {
            pb.inc(chunk.len() as u64);
        }
    }

    writer.flush().await.map_err(|e| DownloadError::io(path, e))?;
    Ok(written)
}
