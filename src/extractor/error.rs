//! Error types for extractor operations.
//!
//! Extractors never surface these to callers of [`extract`](super::extract);
//! the wrapper maps each variant onto an
//! [`ExtractorErrorCode`](crate::report::ExtractorErrorCode) and decides
//! whether the extractor type gets marked broken.

use thiserror::Error;

use crate::content::TreeError;
use crate::download::DownloadError;

#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The site didn't answer usefully (network error, timeout, HTTP error status).
    #[error("no response from {url}: {source}")]
    NoResponse {
        url: String,
        #[source]
        source: DownloadError,
    },

    /// A credential the site API needs is missing or was rejected.
    #[error("authentication unavailable for {site}: {reason}")]
    NoAuthentication { site: &'static str, reason: String },

    /// The page answered but its content couldn't be understood.
    #[error("could not extract info from {url}: {reason}")]
    InfoExtraction { url: String, reason: String },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("unexpected failure extracting {url}: {reason}")]
    Other { url: String, reason: String },
}

impl ExtractorError {
    /// Classifies a failed page or API fetch.
    #[must_use]
    pub fn from_fetch(url: impl Into<String>, source: DownloadError) -> Self {
        let url = url.into();
        if source.is_no_response() {
            return Self::NoResponse { url, source };
        }
        match source {
            DownloadError::Json { .. } | DownloadError::Playlist { .. } => Self::InfoExtraction {
                url,
                reason: source.to_string(),
            },
            other => Self::Other {
                url,
                reason: other.to_string(),
            },
        }
    }

    #[must_use]
    pub fn info(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InfoExtraction {
            url: url.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn no_auth(site: &'static str, reason: impl Into<String>) -> Self {
        Self::NoAuthentication {
            site,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_errors_classify_as_no_response() {
        let err = ExtractorError::from_fetch(
            "https://soundgasm.net/u/a/b",
            DownloadError::http_status("https://soundgasm.net/u/a/b", 404),
        );
        assert!(matches!(err, ExtractorError::NoResponse { .. }));
    }

    #[test]
    fn test_bad_json_classifies_as_info_extraction() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ExtractorError::from_fetch("u", DownloadError::json("u", json_err));
        assert!(matches!(err, ExtractorError::InfoExtraction { .. }));
    }

    #[test]
    fn test_io_failure_classifies_as_other() {
        let io = std::io::Error::other("disk");
        let err = ExtractorError::from_fetch("u", DownloadError::io("/tmp/x", io));
        assert!(matches!(err, ExtractorError::Other { .. }));
    }
}
