//! Outcome codes and the per-URL report tree.
//!
//! Extraction records an [`ExtractorErrorCode`] per visited URL; the
//! orchestrator later fills in a [`DownloadErrorCode`] on the same report.
//! Reports live in a [`ReportTree`] arena whose lifetime is independent of the
//! content tree: one tree per run, rendered once by [`html`] and dropped.

pub mod html;

use std::fmt;

/// Result of extracting a single URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractorErrorCode {
    NoErrors,
    // warnings
    BannedTag,
    EmptyCollection,
    StopRecursion,
    // errors
    BrokenExtractor,
    NoResponse,
    NoExtractor,
    NoAuthentication,
    ErrorInChildren,
    NoSupportedAudioLink,
}

impl ExtractorErrorCode {
    /// Warnings are logged and shown in the report but never promote a parent.
    #[must_use]
    pub fn is_warning(self) -> bool {
        matches!(
            self,
            Self::BannedTag | Self::EmptyCollection | Self::StopRecursion
        )
    }

    /// Everything that is neither `NoErrors` nor a warning.
    #[must_use]
    pub fn is_error(self) -> bool {
        self != Self::NoErrors && !self.is_warning()
    }

    /// Stable label used in logs and the HTML report.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoErrors => "NO_ERRORS",
            Self::BannedTag => "BANNED_TAG",
            Self::EmptyCollection => "EMPTY_COLLECTION",
            Self::StopRecursion => "STOP_RECURSION",
            Self::BrokenExtractor => "BROKEN_EXTRACTOR",
            Self::NoResponse => "NO_RESPONSE",
            Self::NoExtractor => "NO_EXTRACTOR",
            Self::NoAuthentication => "NO_AUTHENTICATION",
            Self::ErrorInChildren => "ERROR_IN_CHILDREN",
            Self::NoSupportedAudioLink => "NO_SUPPORTED_AUDIO_LINK",
        }
    }
}

impl fmt::Display for ExtractorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of downloading a content-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DownloadErrorCode {
    Downloaded,
    #[default]
    NotDownloaded,
    SkippedDuplicate,
    ChoseOtherHost,
    ExternalError,
    HttpErrUnauthorized,
    HttpErrForbidden,
    HttpErrNotFound,
    HttpErrGone,
    HttpErrTooManyRequests,
    HttpErrServerError,
    HttpErrBadGateway,
    HttpErrServiceUnavailable,
    HttpErrorOther,
    CollectionComplete,
    CollectionIncomplete,
}

impl DownloadErrorCode {
    /// Maps an HTTP status code of a failed transfer.
    #[must_use]
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 => Self::HttpErrUnauthorized,
            403 => Self::HttpErrForbidden,
            404 => Self::HttpErrNotFound,
            410 => Self::HttpErrGone,
            429 => Self::HttpErrTooManyRequests,
            500 => Self::HttpErrServerError,
            502 => Self::HttpErrBadGateway,
            503 => Self::HttpErrServiceUnavailable,
            _ => Self::HttpErrorOther,
        }
    }

    /// Whether the node ended up in a state that needs no further action.
    ///
    /// Duplicates and deliberately skipped mirrors count as settled.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            Self::Downloaded
                | Self::SkippedDuplicate
                | Self::ChoseOtherHost
                | Self::CollectionComplete
        )
    }

    /// Stable label used in logs and the HTML report.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Downloaded => "DOWNLOADED",
            Self::NotDownloaded => "NOT_DOWNLOADED",
            Self::SkippedDuplicate => "SKIPPED_DUPLICATE",
            Self::ChoseOtherHost => "CHOSE_OTHER_HOST",
            Self::ExternalError => "EXTERNAL_ERROR",
            Self::HttpErrUnauthorized => "HTTP_ERR_UNAUTHORIZED",
            Self::HttpErrForbidden => "HTTP_ERR_FORBIDDEN",
            Self::HttpErrNotFound => "HTTP_ERR_NOT_FOUND",
            Self::HttpErrGone => "HTTP_ERR_GONE",
            Self::HttpErrTooManyRequests => "HTTP_ERR_TOO_MANY_REQUESTS",
            Self::HttpErrServerError => "HTTP_ERR_SERVER_ERROR",
            Self::HttpErrBadGateway => "HTTP_ERR_BAD_GATEWAY",
            Self::HttpErrServiceUnavailable => "HTTP_ERR_SERVICE_UNAVAILABLE",
            Self::HttpErrorOther => "HTTP_ERROR_OTHER",
            Self::CollectionComplete => "COLLECTION_COMPLETE",
            Self::CollectionIncomplete => "COLLECTION_INCOMPLETE",
        }
    }
}

impl fmt::Display for DownloadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a report inside a [`ReportTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportId(usize);

/// Outcome of one URL, with the outcomes of the URLs it led to.
#[derive(Debug, Clone)]
pub struct ExtractorReport {
    pub url: String,
    pub err_code: ExtractorErrorCode,
    pub download_error: DownloadErrorCode,
    children: Vec<ReportId>,
}

impl ExtractorReport {
    /// Child reports in the order they were appended.
    #[must_use]
    pub fn children(&self) -> &[ReportId] {
        &self.children
    }
}

/// Arena owning every report of a run.
#[derive(Debug, Default)]
pub struct ReportTree {
    reports: Vec<ExtractorReport>,
}

impl ReportTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached report.
    pub fn create(&mut self, url: impl Into<String>, err_code: ExtractorErrorCode) -> ReportId {
        let id = ReportId(self.reports.len());
        self.reports.push(ExtractorReport {
            url: url.into(),
            err_code,
            download_error: DownloadErrorCode::NotDownloaded,
            children: Vec::new(),
        });
        id
    }

    /// Appends `child` to `parent`, promoting the parent to `ErrorInChildren`
    /// if the child carries an error and the parent is still at `NoErrors`.
    pub fn add_child(&mut self, parent: ReportId, child: ReportId) {
        let child_code = self.reports[child.0].err_code;
        let parent_report = &mut self.reports[parent.0];
        parent_report.children.push(child);
        if child_code.is_error() && parent_report.err_code == ExtractorErrorCode::NoErrors {
            parent_report.err_code = ExtractorErrorCode::ErrorInChildren;
        }
    }

    #[must_use]
    pub fn get(&self, id: ReportId) -> &ExtractorReport {
        &self.reports[id.0]
    }

    pub fn set_err_code(&mut self, id: ReportId, code: ExtractorErrorCode) {
        self.reports[id.0].err_code = code;
    }

    pub fn set_download_error(&mut self, id: ReportId, code: DownloadErrorCode) {
        self.reports[id.0].download_error = code;
    }

    /// Number of reports held, including nested ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}
