//! The download orchestrator.
//!
//! [`GwaRipper`] owns one run: it resolves an extractor per URL, walks the
//! resulting content tree and turns it into files below the library root
//! plus rows in the library database. Every outcome is recorded in the run's
//! [`ReportTree`]; [`GwaRipper::close`] renders it and does the end-of-run
//! housekeeping.
//!
//! # Layout below the root
//!
//! ```text
//! <root>/gwarip_db.sqlite        library database
//! <root>/_db-autocsv.csv         flattened export, rewritten on close
//! <root>/_db-bu/                 database backups
//! <root>/_reports/               one HTML report per run
//! <root>/<author>/<subpath>/     downloaded files
//! ```

mod collection;
mod file;
mod mirror;

pub use mirror::choose_mirrors;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::{ConfigError, REDDIT_REQUEST_DELAY, RipperConfig};
use crate::content::{ContentTree, NodeId, RedditInfo};
use crate::db::{Database, DbError};
use crate::download::{DownloadError, HttpClient, RateLimiter};
use crate::extractor::{
    BrokenExtractors, ExtractContext, ExtractorType, RedditSubmission, extract, find_extractor,
};
use crate::library::{self, LibraryError};
use crate::report::{DownloadErrorCode, ExtractorErrorCode, ReportId, ReportTree, html};

pub const DB_FILENAME: &str = "gwarip_db.sqlite";
pub const CSV_FILENAME: &str = "_db-autocsv.csv";
pub const REPORTS_DIR: &str = "_reports";
pub const BACKUP_DIR: &str = "_db-bu";

/// Directory name for collections of a deleted reddit account.
const DELETED_USER: &str = "deleted_user";
const UNKNOWN_USER: &str = "unknown_user";

#[derive(Debug, Error)]
pub enum RipperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open library database at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: DbError,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

impl RipperError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for RipperError {
    fn from(err: sqlx::Error) -> Self {
        Self::Library(LibraryError::from(err))
    }
}

/// State of one extract-and-download run.
pub struct GwaRipper {
    config: RipperConfig,
    db: Option<Database>,
    client: HttpClient,
    broken: BrokenExtractors,
    reports: ReportTree,
    top_level: Vec<ReportId>,
}

impl GwaRipper {
    /// Validates `config`, creates the root directory and opens the library.
    ///
    /// # Errors
    ///
    /// Invalid config, an unusable root directory, a database that can't be
    /// opened or migrated, or an HTTP client that can't be built.
    #[instrument(skip(config), fields(root = %config.root_dir.display()))]
    pub async fn open(config: RipperConfig) -> Result<Self, RipperError> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.root_dir)
            .await
            .map_err(|e| RipperError::io(&config.root_dir, e))?;

        let db_path = config.root_dir.join(DB_FILENAME);
        let db = Database::new(&db_path)
            .await
            .map_err(|source| RipperError::Storage {
                path: db_path.clone(),
                source,
            })?;

        let mut limiter = RateLimiter::new(config.request_delay);
        if !limiter.is_disabled() {
            limiter = limiter.with_domain_delay("reddit.com", REDDIT_REQUEST_DELAY);
        }
        let client = HttpClient::with_timeouts(
            Arc::new(limiter),
            config.connect_timeout_secs,
            config.read_timeout_secs,
        )?;

        info!(db = %db_path.display(), "library opened");
        Ok(Self {
            config,
            db: Some(db),
            client,
            broken: BrokenExtractors::new(),
            reports: ReportTree::new(),
            top_level: Vec::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RipperConfig {
        &self.config
    }

    #[must_use]
    pub fn reports(&self) -> &ReportTree {
        &self.reports
    }

    /// Reports of the URLs handed to this ripper, in submission order.
    #[must_use]
    pub fn top_level_reports(&self) -> &[ReportId] {
        &self.top_level
    }

    #[must_use]
    pub fn broken_extractors(&self) -> &BrokenExtractors {
        &self.broken
    }

    /// `None` once [`close`](Self::close) has run.
    #[must_use]
    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    /// Runs extraction for `url` only; the report is recorded as top-level.
    pub async fn extract_only(
        &mut self,
        url: &str,
        init_from: Option<RedditSubmission>,
    ) -> (ContentTree, Option<NodeId>, ReportId) {
        let Some(kind) = find_extractor(url) else {
            warn!(url, "no extractor for url");
            let report = self.reports.create(url, ExtractorErrorCode::NoExtractor);
            self.top_level.push(report);
            return (ContentTree::new(), None, report);
        };
        self.extract_with(kind, url, init_from).await
    }

    async fn extract_with(
        &mut self,
        kind: ExtractorType,
        url: &str,
        init_from: Option<RedditSubmission>,
    ) -> (ContentTree, Option<NodeId>, ReportId) {
        let mut tree = ContentTree::new();
        let mut ctx = ExtractContext {
            client: &self.client,
            settings: &self.config.extractor,
            broken: &self.broken,
            tree: &mut tree,
            reports: &mut self.reports,
        };
        let (node, report) = extract(kind, &mut ctx, url, None, None, init_from).await;
        self.top_level.push(report);
        (tree, node, report)
    }

    /// Extracts `url` and downloads whatever it yields.
    #[instrument(skip(self))]
    pub async fn extract_and_download(&mut self, url: &str) -> ReportId {
        let (mut tree, node, report) = self.extract_only(url, None).await;
        if let Some(node) = node {
            self.download(&mut tree, node).await;
        }
        report
    }

    /// Same as [`extract_and_download`](Self::extract_and_download) for a
    /// submission whose API data the caller already has.
    #[instrument(skip(self, submission), fields(id = %submission.id))]
    pub async fn extract_and_download_submission(
        &mut self,
        submission: RedditSubmission,
    ) -> ReportId {
        let url = format!("https://www.reddit.com{}", submission.permalink);
        let (mut tree, node, report) = self
            .extract_with(ExtractorType::Reddit, &url, Some(submission))
            .await;
        if let Some(node) = node {
            self.download(&mut tree, node).await;
        }
        report
    }

    /// Downloads `node` and everything below it.
    ///
    /// Storage failures are recorded as `EXTERNAL_ERROR`; nothing here fails
    /// the run.
    pub async fn download(&mut self, tree: &mut ContentTree, node: NodeId) -> DownloadErrorCode {
        let Some(db) = self.db.as_ref() else {
            error!("download requested after close");
            return record(&mut self.reports, tree, node, DownloadErrorCode::ExternalError);
        };
        let mut conn = match db.pool().acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "no database connection available");
                return record(&mut self.reports, tree, node, DownloadErrorCode::ExternalError);
            }
        };

        let mut run = DownloadRun {
            config: &self.config,
            client: &self.client,
            reports: &mut self.reports,
        };
        let code = run
            .download_node(&mut conn, tree, node, Placement::root())
            .await;
        info!(url = %tree.url(node), %code, "download finished");
        code
    }

    /// Exports the library, writes the run report, backs up the database and
    /// closes it. Every step runs even when an earlier one failed.
    #[instrument(skip(self))]
    pub async fn close(mut self) {
        let Some(db) = self.db.take() else {
            return;
        };
        let root = self.config.root_dir.clone();

        let csv = root.join(CSV_FILENAME);
        match library::export_flattened_snapshot(db.pool(), &csv).await {
            Ok(rows) => info!(rows, path = %csv.display(), "library exported"),
            Err(e) => error!(error = %e, "library export failed"),
        }

        if !self.top_level.is_empty() {
            match html::write_report(
                &root.join(REPORTS_DIR),
                &self.reports,
                &self.top_level,
                Local::now(),
            ) {
                Ok(path) => info!(path = %path.display(), "run report written"),
                Err(e) => error!(error = %e, "run report could not be written"),
            }
        }

        match library::backup(db.pool(), &root.join(BACKUP_DIR), self.config.backup_frequency)
            .await
        {
            Ok(Some(path)) => info!(path = %path.display(), "library backed up"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "library backup failed"),
        }

        db.close().await;
        info!("library closed");
    }
}

impl Drop for GwaRipper {
    fn drop(&mut self) {
        if self.db.is_some() {
            warn!("GwaRipper dropped without close(); export, report and backup skipped");
        }
    }
}

/// Sets `code` on `node` and on its report.
fn record(
    reports: &mut ReportTree,
    tree: &mut ContentTree,
    node: NodeId,
    code: DownloadErrorCode,
) -> DownloadErrorCode {
    tree.set_downloaded(node, code);
    if let Some(report) = tree.report(node) {
        reports.set_download_error(report, code);
    }
    code
}

/// Where a node sits relative to the collection being downloaded.
#[derive(Debug, Clone, Default)]
struct Placement {
    collection_id: Option<i64>,
    /// Directory author chosen by the outermost collection.
    author: Option<String>,
    /// Position among the file siblings; 0 when it has none.
    file_index: usize,
}

impl Placement {
    fn root() -> Self {
        Self::default()
    }
}

/// Borrowed state needed while walking one content tree.
struct DownloadRun<'a> {
    config: &'a RipperConfig,
    client: &'a HttpClient,
    reports: &'a mut ReportTree,
}

impl DownloadRun<'_> {
    fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    fn record(&mut self, tree: &mut ContentTree, node: NodeId, code: DownloadErrorCode) -> DownloadErrorCode {
        record(self.reports, tree, node, code)
    }

    fn download_node<'s>(
        &'s mut self,
        conn: &'s mut SqliteConnection,
        tree: &'s mut ContentTree,
        node: NodeId,
        placement: Placement,
    ) -> futures_util::future::BoxFuture<'s, DownloadErrorCode> {
        use futures_util::FutureExt;

        async move {
            if tree.downloaded(node) == DownloadErrorCode::ChoseOtherHost {
                return DownloadErrorCode::ChoseOtherHost;
            }
            if tree.is_file(node) {
                self.download_file(conn, tree, node, &placement).await
            } else {
                self.download_collection(conn, tree, node, &placement).await
            }
        }
        .boxed()
    }
}

/// Directory author for a collection: its own, the first one found below it,
/// or a placeholder.
fn preferred_author(tree: &ContentTree, node: NodeId) -> String {
    tree.author(node)
        .or_else(|| tree.first_descendant_author(node))
        .map_or_else(
            || {
                if tree.is_reddit(node) {
                    DELETED_USER.to_string()
                } else {
                    UNKNOWN_USER.to_string()
                }
            },
            str::to_string,
        )
}

/// Writes the text of a reddit submission to `path`, replacing any older copy.
async fn write_selftext_sidecar(
    path: &Path,
    title: Option<&str>,
    reddit: &RedditInfo,
) -> Result<(), RipperError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RipperError::io(dir, e))?;
    }
    let text = format!(
        "Title: {}\nPermalink: {}\nSubreddit: r/{}\nCreated: {}\n\n{}\n",
        title.unwrap_or_default(),
        reddit.permalink,
        reddit.subreddit,
        reddit.created_utc.to_rfc3339(),
        reddit.selftext.as_deref().unwrap_or_default(),
    );
    tokio::fs::write(path, text)
        .await
        .map_err(|e| RipperError::io(path, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::content::{FileCollection, FileInfo, RedditInfo};

    fn reddit_info() -> RedditInfo {
        RedditInfo {
            permalink: "https://www.reddit.com/r/g/comments/a/".to_string(),
            selftext: None,
            created_utc: chrono::Utc::now(),
            subreddit: "g".to_string(),
            r_post_url: "https://www.reddit.com/r/g/comments/a/".to_string(),
            upvotes: None,
            flair: None,
        }
    }

    #[test]
    fn test_preferred_author_precedence() {
        let mut tree = ContentTree::new();
        let reddit = tree.add_collection(
            FileCollection::new(ExtractorType::Reddit, "https://www.reddit.com/r/g/comments/a/")
                .with_reddit(reddit_info()),
        );
        assert_eq!(preferred_author(&tree, reddit), DELETED_USER);

        let plain = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "https://x/"));
        assert_eq!(preferred_author(&tree, plain), UNKNOWN_USER);

        let file = tree.add_file(
            FileInfo::new(ExtractorType::Soundgasm, true, "m4a", "https://p", "https://d")
                .with_author(Some("voice".to_string())),
        );
        tree.set_parent(file, reddit).unwrap();
        assert_eq!(preferred_author(&tree, reddit), "voice");

        let owned = tree.add_collection(
            FileCollection::new(ExtractorType::Skittykat, "https://y/")
                .with_author(Some("owner".to_string())),
        );
        assert_eq!(preferred_author(&tree, owned), "owner");
    }

    #[tokio::test]
    async fn test_selftext_sidecar_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("author").join("post.txt");
        let mut info = reddit_info();
        info.selftext = Some("first".to_string());
        write_selftext_sidecar(&path, Some("A post"), &info).await.unwrap();
        info.selftext = Some("second".to_string());
        write_selftext_sidecar(&path, Some("A post"), &info).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Title: A post\n"));
        assert!(text.contains("Subreddit: r/g\n"));
        assert!(text.ends_with("\nsecond\n"));
        assert!(!text.contains("first"));
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RipperConfig::with_root(dir.path());
        config.read_timeout_secs = 0;
        let err = GwaRipper::open(config).await.err().unwrap();
        assert!(matches!(err, RipperError::Config(_)));
    }

    #[tokio::test]
    async fn test_unsupported_url_reports_no_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let mut ripper = GwaRipper::open(RipperConfig::with_root(dir.path()))
            .await
            .unwrap();
        let report = ripper
            .extract_and_download("https://example.com/not-supported")
            .await;
        assert_eq!(
            ripper.reports().get(report).err_code,
            ExtractorErrorCode::NoExtractor
        );
        assert_eq!(ripper.top_level_reports(), &[report]);
        ripper.close().await;

        assert!(dir.path().join(CSV_FILENAME).exists());
        assert!(dir.path().join(REPORTS_DIR).is_dir());
        assert!(dir.path().join(BACKUP_DIR).is_dir());
    }
}
