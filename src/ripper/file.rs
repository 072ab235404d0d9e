//! Downloading a single file node.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, error, info, instrument, warn};

use super::{DownloadRun, Placement, RipperError, UNKNOWN_USER, write_selftext_sidecar};
use crate::content::filename::{pad_filename_if_exists, sanitize_component};
use crate::content::{ContentTree, FileInfo, NodeId};
use crate::download::constants::PROGRESS_TEMPLATE;
use crate::download::{DownloadError, download_hls};
use crate::extractor::ExtractorType;
use crate::library::{self, ExistingAudio, MissingRedditFields};
use crate::report::DownloadErrorCode;

/// Where a new file goes, both on disk and as stored in the library.
struct Target {
    author: String,
    dest: std::path::PathBuf,
    /// Relative to the library root, `/`-separated.
    relative: String,
}

impl DownloadRun<'_> {
    #[instrument(skip(self, conn, tree, placement), fields(url = %tree.url(node)))]
    pub(super) async fn download_file(
        &mut self,
        conn: &mut SqliteConnection,
        tree: &mut ContentTree,
        node: NodeId,
        placement: &Placement,
    ) -> DownloadErrorCode {
        let Some(info) = tree.file(node).cloned() else {
            error!("node is not a file");
            return self.record(tree, node, DownloadErrorCode::ExternalError);
        };

        if info.is_audio {
            match self.check_duplicate(conn, tree, node, &info).await {
                Ok(true) => return self.record(tree, node, DownloadErrorCode::SkippedDuplicate),
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "duplicate lookup failed");
                    return self.record(tree, node, DownloadErrorCode::ExternalError);
                }
            }
        }

        let code = match self.store_and_transfer(conn, tree, node, &info, placement).await {
            Ok(id_in_db) => {
                if let Some(file) = tree.file_mut(node) {
                    file.id_in_db = id_in_db;
                }
                DownloadErrorCode::Downloaded
            }
            Err(e) => failure_code(tree, node, &e),
        };
        self.record(tree, node, code)
    }

    /// Whether the file is already in the library. Marks the node and, when
    /// enabled, backfills reddit context of a standalone soundgasm row.
    async fn check_duplicate(
        &self,
        conn: &mut SqliteConnection,
        tree: &mut ContentTree,
        node: NodeId,
        info: &FileInfo,
    ) -> Result<bool, RipperError> {
        let Some(existing) =
            library::find_audio_by_urls(conn, &info.page_url, &info.direct_url).await?
        else {
            return Ok(false);
        };
        debug!(id = existing.id, filename = %existing.filename, "already downloaded");

        let backfilled = self.config.set_missing_reddit
            && existing.is_standalone()
            && existing.extractor == ExtractorType::Soundgasm.name()
            && self.backfill_reddit(conn, tree, node, info, &existing).await?;

        if let Some(file) = tree.file_mut(node) {
            file.already_downloaded = true;
            file.backfilled = backfilled;
            file.id_in_db = Some(existing.id);
        }
        Ok(true)
    }

    async fn backfill_reddit(
        &self,
        conn: &mut SqliteConnection,
        tree: &ContentTree,
        node: NodeId,
        info: &FileInfo,
        existing: &ExistingAudio,
    ) -> Result<bool, RipperError> {
        let Some(coll) = tree.reddit_info(node).and_then(|r| tree.collection(r)) else {
            return Ok(false);
        };
        let (Some(collection_id), Some(reddit)) = (coll.id_in_db, coll.reddit.as_ref()) else {
            return Ok(false);
        };

        let fields = MissingRedditFields {
            collection_id,
            title: info.title.as_deref().or(coll.title.as_deref()),
            description: info.descr.as_deref(),
        };
        if !library::update_missing_reddit_fields(conn, existing.id, &fields).await? {
            return Ok(false);
        }
        if reddit.selftext.is_some() {
            let path = self.root_dir().join(&existing.filename).with_extension("txt");
            write_selftext_sidecar(&path, coll.title.as_deref(), reddit).await?;
        }
        info!(id = existing.id, permalink = %reddit.permalink, "filled in missing reddit info");
        Ok(true)
    }

    /// Transfers the file; audio is recorded in a transaction that only
    /// commits after a complete transfer. Returns the new row id for audio.
    async fn store_and_transfer(
        &self,
        conn: &mut SqliteConnection,
        tree: &ContentTree,
        node: NodeId,
        info: &FileInfo,
        placement: &Placement,
    ) -> Result<Option<i64>, RipperError> {
        let target = self.target(conn, tree, node, info, placement).await?;

        if !info.is_audio {
            self.transfer(info, &target.dest).await?;
            return Ok(None);
        }

        let mut tx = conn.begin().await?;
        let id = library::insert_audio_file(
            &mut tx,
            info,
            placement.collection_id,
            &target.relative,
            &target.author,
        )
        .await?;
        match self.transfer(info, &target.dest).await {
            Ok(()) => {
                tx.commit().await?;
                info!(path = %target.relative, "downloaded");
                Ok(Some(id))
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed transfer failed");
                }
                Err(e.into())
            }
        }
    }

    async fn target(
        &self,
        conn: &mut SqliteConnection,
        tree: &ContentTree,
        node: NodeId,
        info: &FileInfo,
        placement: &Placement,
    ) -> Result<Target, RipperError> {
        let author = match (&placement.author, info.author.as_deref()) {
            (Some(author), _) => author.clone(),
            (None, Some(author)) => library::resolve_alias(conn, author).await?,
            (None, None) => UNKNOWN_USER.to_string(),
        };
        let author_dir = Some(sanitize_component(&author))
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_USER.to_string());

        let (subpath, name) = tree.generate_filename(node, placement.file_index);
        let mut dir = self.root_dir().join(&author_dir);
        let mut relative = vec![author_dir];
        if !subpath.is_empty() {
            dir.push(&subpath);
            relative.push(subpath);
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RipperError::io(&dir, e))?;

        let name = pad_filename_if_exists(&dir, &name, &info.ext);
        let file_name = if info.ext.is_empty() {
            name
        } else {
            format!("{name}.{}", info.ext)
        };
        let dest = dir.join(&file_name);
        relative.push(file_name);
        Ok(Target {
            author,
            dest,
            relative: relative.join("/"),
        })
    }

    async fn transfer(&self, info: &FileInfo, dest: &Path) -> Result<(), DownloadError> {
        if info.is_hls() {
            return download_hls(
                self.client,
                &info.direct_url,
                dest,
                &self.config.hls_backoff,
                &self.config.ffmpeg_path,
            )
            .await;
        }

        let progress = self.config.show_progress.then(|| progress_bar(dest));
        let result = self
            .client
            .download_chunked(&info.direct_url, dest, progress.as_ref())
            .await;
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        let bytes = result?;
        debug!(bytes, "file written");
        Ok(())
    }
}

fn progress_bar(dest: &Path) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    if let Some(name) = dest.file_name() {
        pb.set_message(name.to_string_lossy().into_owned());
    }
    pb
}

/// Report code of a failed file download.
fn failure_code(tree: &ContentTree, node: NodeId, err: &RipperError) -> DownloadErrorCode {
    match err {
        RipperError::Download(e @ DownloadError::ContentTooShort { .. }) => {
            warn!(
                error = %e,
                root = %tree.url(tree.root(node)),
                "transfer cut short; not retried"
            );
            DownloadErrorCode::NotDownloaded
        }
        RipperError::Download(e) => {
            warn!(error = %e, "transfer failed");
            e.to_download_code()
        }
        other => {
            error!(error = %other, "could not store file");
            DownloadErrorCode::ExternalError
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::content::FileCollection;

    #[test]
    fn test_content_too_short_is_not_downloaded() {
        let mut tree = ContentTree::new();
        let root = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "https://c/"));
        let file = tree.add_file(FileInfo::new(
            ExtractorType::Soundgasm,
            true,
            "m4a",
            "https://p",
            "https://d",
        ));
        tree.set_parent(file, root).unwrap();

        let err = RipperError::Download(DownloadError::content_too_short("https://d", 10, 3));
        assert_eq!(failure_code(&tree, file, &err), DownloadErrorCode::NotDownloaded);

        let err = RipperError::Download(DownloadError::http_status("https://d", 404));
        assert_eq!(failure_code(&tree, file, &err), DownloadErrorCode::HttpErrNotFound);

        let err = RipperError::io("/x", std::io::Error::other("disk full"));
        assert_eq!(failure_code(&tree, file, &err), DownloadErrorCode::ExternalError);
    }

    #[test]
    fn test_progress_bar_named_after_file() {
        let pb = progress_bar(Path::new("/lib/author/01_title.m4a"));
        assert_eq!(pb.message(), "01_title.m4a");
    }
}
