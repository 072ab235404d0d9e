//! Node payloads of the content tree.

use chrono::{DateTime, Utc};

use super::NodeId;
use crate::extractor::ExtractorType;
use crate::report::DownloadErrorCode;

/// A single downloadable asset, usually one audio file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub extractor: ExtractorType,
    pub is_audio: bool,
    /// Extension without the leading dot (`m4a`, `jpg`, ...).
    pub ext: String,
    /// Stable identity of the file; globally unique.
    pub page_url: String,
    /// Location of the bytes; may expire.
    pub direct_url: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub descr: Option<String>,
    pub author: Option<String>,

    pub downloaded: DownloadErrorCode,
    pub already_downloaded: bool,
    /// Set when an already stored file got its missing reddit context filled in.
    pub backfilled: bool,
    pub id_in_db: Option<i64>,
}

impl FileInfo {
    #[must_use]
    pub fn new(
        extractor: ExtractorType,
        is_audio: bool,
        ext: impl Into<String>,
        page_url: impl Into<String>,
        direct_url: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            is_audio,
            ext: ext.into(),
            page_url: page_url.into(),
            direct_url: direct_url.into(),
            id: None,
            title: None,
            descr: None,
            author: None,
            downloaded: DownloadErrorCode::NotDownloaded,
            already_downloaded: false,
            backfilled: false,
            id_in_db: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    #[must_use]
    pub fn with_descr(mut self, descr: Option<String>) -> Self {
        self.descr = descr;
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }

    /// Whether the direct URL points at an HLS playlist rather than the file itself.
    #[must_use]
    pub fn is_hls(&self) -> bool {
        url::Url::parse(&self.direct_url)
            .map(|u| u.path().to_ascii_lowercase().ends_with(".m3u8"))
            .unwrap_or(false)
    }
}

/// Submission metadata carried by a collection rooted at a reddit post.
#[derive(Debug, Clone)]
pub struct RedditInfo {
    pub permalink: String,
    pub selftext: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub subreddit: String,
    /// Outgoing link of a link post, or the post itself for self posts.
    pub r_post_url: String,
    pub upvotes: Option<i64>,
    pub flair: Option<String>,
}

/// Ordered group of files and sub-collections sharing one source.
#[derive(Debug, Clone)]
pub struct FileCollection {
    pub extractor: ExtractorType,
    pub url: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    /// Present iff this collection is a reddit submission.
    pub reddit: Option<RedditInfo>,

    pub downloaded: DownloadErrorCode,
    pub id_in_db: Option<i64>,

    pub(super) children: Vec<NodeId>,
}

impl FileCollection {
    #[must_use]
    pub fn new(extractor: ExtractorType, url: impl Into<String>) -> Self {
        Self {
            extractor,
            url: url.into(),
            id: None,
            title: None,
            author: None,
            reddit: None,
            downloaded: DownloadErrorCode::NotDownloaded,
            id_in_db: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }

    #[must_use]
    pub fn with_reddit(mut self, reddit: RedditInfo) -> Self {
        self.reddit = Some(reddit);
        self
    }

    #[must_use]
    pub fn is_reddit(&self) -> bool {
        self.reddit.is_some()
    }

    /// Direct children in document order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}
