//! Error types for the download module.

use std::path::PathBuf;

use thiserror::Error;

use crate::report::DownloadErrorCode;

/// Errors that can occur while fetching pages or files.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout fetching {url}")]
    Timeout { url: String },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// The body ended before the declared `Content-Length`.
    #[error("content too short for {url}: expected {expected} bytes, got {actual}")]
    ContentTooShort {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unusable playlist {url}: {reason}")]
    Playlist { url: String, reason: String },

    #[error("ffmpeg failed: {reason}")]
    Ffmpeg { reason: String },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl DownloadError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    pub fn content_too_short(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::ContentTooShort {
            url: url.into(),
            expected,
            actual,
        }
    }

    pub fn json(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            url: url.into(),
            source,
        }
    }

    pub fn playlist(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Playlist {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn ffmpeg(reason: impl Into<String>) -> Self {
        Self::Ffmpeg {
            reason: reason.into(),
        }
    }

    /// HTTP status of a failed response, if that's what failed.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure means the remote end never produced a usable answer.
    ///
    /// Used by extractors to tell "site down / page gone" apart from
    /// "page changed and we can't parse it".
    #[must_use]
    pub fn is_no_response(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::HttpStatus { .. }
        )
    }

    /// Outcome code recorded on the report when a transfer fails with this error.
    #[must_use]
    pub fn to_download_code(&self) -> DownloadErrorCode {
        match self {
            Self::HttpStatus { status, .. } => DownloadErrorCode::from_http_status(*status),
            Self::Io { .. } | Self::Ffmpeg { .. } | Self::ClientBuild(_) => {
                DownloadErrorCode::ExternalError
            }
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::InvalidUrl { .. }
            | Self::ContentTooShort { .. }
            | Self::Json { .. }
            | Self::Playlist { .. } => DownloadErrorCode::NotDownloaded,
        }
    }
}
