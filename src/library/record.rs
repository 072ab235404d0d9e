//! Row types read from and written to the library.

use sqlx::FromRow;

/// An audio file that is already in the library.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct ExistingAudio {
    pub id: i64,
    pub url: String,
    pub direct_url: Option<String>,
    /// Relative to the library root.
    pub filename: String,
    pub collection_id: Option<i64>,
    pub extractor: String,
}

impl ExistingAudio {
    /// A file that was downloaded on its own, without any page that linked to it.
    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.collection_id.is_none()
    }
}

/// Context merged into an existing audio row; only NULL columns are filled.
#[derive(Debug, Clone, Copy)]
pub struct MissingRedditFields<'a> {
    /// Collection row of the reddit submission that links to the file.
    pub collection_id: i64,
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
}

/// One line of the flattened CSV export.
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub date: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: String,
    pub direct_url: Option<String>,
    pub filename: String,
    pub extractor: String,
    pub artist: Option<String>,
    pub collection_url: Option<String>,
    pub collection_title: Option<String>,
    pub reddit_url: Option<String>,
    pub subreddit: Option<String>,
    pub reddit_created: Option<String>,
    pub upvotes: Option<i64>,
    pub flair: Option<String>,
}
