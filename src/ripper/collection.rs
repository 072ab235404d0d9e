//! Downloading a collection node and everything below it.

use sqlx::{Connection, SqliteConnection};
use tracing::{debug, error, info, instrument, warn};

use super::{
    DownloadRun, Placement, RipperError, choose_mirrors, preferred_author, write_selftext_sidecar,
};
use crate::content::{ContentTree, NodeId};
use crate::library;
use crate::report::DownloadErrorCode;

impl DownloadRun<'_> {
    /// Records the collection, downloads its children in document order and
    /// aggregates their outcome.
    ///
    /// The collection row is committed before any child is fetched and every
    /// audio row commits with its own transfer, so an interrupted run keeps
    /// what it finished. A reddit submission recorded by this call whose
    /// audio neither downloaded nor got backfilled is removed again.
    #[instrument(skip(self, conn, tree, placement), fields(url = %tree.url(node)))]
    pub(super) async fn download_collection(
        &mut self,
        conn: &mut SqliteConnection,
        tree: &mut ContentTree,
        node: NodeId,
        placement: &Placement,
    ) -> DownloadErrorCode {
        let author = placement
            .author
            .clone()
            .unwrap_or_else(|| preferred_author(tree, node));

        let (collection_id, resolved_author, created) =
            match store_collection(conn, tree, node, &author, placement.collection_id).await {
                Ok(row) => row,
                Err(e) => {
                    error!(error = %e, "could not record collection");
                    return self.record(tree, node, DownloadErrorCode::ExternalError);
                }
            };
        if let Some(coll) = tree.collection_mut(node) {
            coll.id_in_db = Some(collection_id);
        }
        let dir_author = placement.author.clone().unwrap_or(resolved_author);

        if self.config.only_one_mirror {
            for loser in choose_mirrors(tree, node, &self.config.host_priority) {
                debug!(url = %tree.url(loser), "mirror on a lower-ranked host skipped");
                self.record(tree, loser, DownloadErrorCode::ChoseOtherHost);
            }
        }

        let numbered = tree.nr_direct_files(node) > 1;
        let children = tree.children(node).to_vec();
        let mut file_index = 0;
        let mut complete = true;
        for child in children {
            let index = if numbered && tree.is_file(child) {
                file_index += 1;
                file_index
            } else {
                0
            };
            let child_placement = Placement {
                collection_id: Some(collection_id),
                author: Some(dir_author.clone()),
                file_index: index,
            };
            let code = self.download_node(conn, tree, child, child_placement).await;
            complete &= code.is_settled();
        }

        let (downloaded_audio, kept_audio) = audio_outcome(tree, node);
        if tree.is_reddit(node) && !kept_audio && created {
            debug!("no audio kept, dropping submission rows");
            match library::delete_collection_tree(conn, collection_id).await {
                Ok(_) => {
                    if let Some(coll) = tree.collection_mut(node) {
                        coll.id_in_db = None;
                    }
                }
                Err(e) => warn!(error = %e, "could not drop submission rows"),
            }
        }

        if downloaded_audio {
            self.write_submission_text(tree, node, &dir_author).await;
        }

        let code = if complete {
            DownloadErrorCode::CollectionComplete
        } else {
            DownloadErrorCode::CollectionIncomplete
        };
        info!(%code, files = tree.nr_files(node), "collection finished");
        self.record(tree, node, code)
    }

    /// Writes the selftext of a reddit submission next to its files.
    async fn write_submission_text(&self, tree: &ContentTree, node: NodeId, author: &str) {
        let Some(reddit) = tree.collection(node).and_then(|c| c.reddit.as_ref()) else {
            return;
        };
        if reddit.selftext.is_none() {
            return;
        }

        let (subpath, name) = tree.generate_filename(node, 0);
        let mut dir = self.root_dir().join(author);
        for part in [subpath, tree.subpath(node)] {
            if !part.is_empty() {
                dir.push(part);
            }
        }
        let path = dir.join(format!("{name}.txt"));
        match write_selftext_sidecar(&path, tree.title(node), reddit).await {
            Ok(()) => debug!(path = %path.display(), "selftext written"),
            Err(e) => error!(error = %e, "could not write selftext"),
        }
    }
}

/// Commits the row of collection `node`. Returns its id, the directory
/// author and whether the row is new.
async fn store_collection(
    conn: &mut SqliteConnection,
    tree: &ContentTree,
    node: NodeId,
    author: &str,
    parent_id: Option<i64>,
) -> Result<(i64, String, bool), RipperError> {
    let mut tx = conn.begin().await?;
    let created = library::find_collection_id(&mut tx, tree.url(node))
        .await?
        .is_none();
    let (id, resolved_author) =
        library::insert_collection(&mut tx, tree, node, author, parent_id).await?;
    tx.commit().await?;
    Ok((id, resolved_author, created))
}

/// Whether any audio file below `node` was downloaded in this run, and
/// whether any was downloaded or backfilled.
fn audio_outcome(tree: &ContentTree, node: NodeId) -> (bool, bool) {
    let mut downloaded = false;
    let mut kept = false;
    for file in tree.descendant_files(node) {
        let Some(info) = tree.file(file).filter(|i| i.is_audio) else {
            continue;
        };
        let fresh = info.downloaded == DownloadErrorCode::Downloaded;
        downloaded |= fresh;
        kept |= fresh || info.backfilled;
    }
    (downloaded, kept)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::content::{FileCollection, FileInfo};
    use crate::extractor::ExtractorType;

    fn child(tree: &mut ContentTree, parent: NodeId, is_audio: bool, code: DownloadErrorCode) -> NodeId {
        let file = tree.add_file(FileInfo::new(
            ExtractorType::Soundgasm,
            is_audio,
            "m4a",
            format!("https://p/{}", tree.len()),
            "https://d",
        ));
        tree.set_parent(file, parent).unwrap();
        tree.set_downloaded(file, code);
        file
    }

    #[test]
    fn test_audio_outcome_ignores_images() {
        let mut tree = ContentTree::new();
        let root = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "https://c/"));
        child(&mut tree, root, false, DownloadErrorCode::Downloaded);
        child(&mut tree, root, true, DownloadErrorCode::SkippedDuplicate);
        assert_eq!(audio_outcome(&tree, root), (false, false));
    }

    #[test]
    fn test_audio_outcome_counts_backfill_as_kept() {
        let mut tree = ContentTree::new();
        let root = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "https://c/"));
        let dup = child(&mut tree, root, true, DownloadErrorCode::SkippedDuplicate);
        tree.file_mut(dup).unwrap().backfilled = true;
        assert_eq!(audio_outcome(&tree, root), (false, true));

        child(&mut tree, root, true, DownloadErrorCode::Downloaded);
        assert_eq!(audio_outcome(&tree, root), (true, true));
    }
}
