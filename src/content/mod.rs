//! Content tree built by the extractors and consumed by the downloader.
//!
//! Nodes live in a [`ContentTree`] arena and are addressed by [`NodeId`].
//! Each node caches the nearest ancestor collection that carries reddit
//! submission data; the cache is kept in sync by [`ContentTree::set_parent`].

pub mod filename;
mod info;

pub use info::{FileCollection, FileInfo, RedditInfo};

use std::collections::VecDeque;

use thiserror::Error;

use crate::extractor::ExtractorType;
use crate::report::{DownloadErrorCode, ReportId};
use filename::{
    MAX_RELATIVE_PATH_LEN, MAX_SUBPATH_LEN, MIN_FILENAME_BUDGET, sanitize_component,
    truncate_chars,
};

/// A collection gets its own folder only with at least this many files.
pub const MIN_FILES_FOR_SUBPATH: usize = 3;

/// Handle to a node inside a [`ContentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Errors raised while linking nodes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("node {0:?} is not a collection")]
    NotACollection(NodeId),
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    File(FileInfo),
    Collection(FileCollection),
}

#[derive(Debug, Clone)]
pub struct Node {
    parent: Option<NodeId>,
    reddit_info: Option<NodeId>,
    report: Option<ReportId>,
    kind: NodeKind,
}

impl Node {
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
}

/// Arena owning every node extracted during a run.
#[derive(Debug, Default)]
pub struct ContentTree {
    nodes: Vec<Node>,
}

impl ContentTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            reddit_info: None,
            report: None,
            kind,
        });
        id
    }

    /// Adds a detached file node.
    pub fn add_file(&mut self, info: FileInfo) -> NodeId {
        self.push(NodeKind::File(info))
    }

    /// Adds a detached collection node. Children passed in `coll` are ignored.
    pub fn add_collection(&mut self, mut coll: FileCollection) -> NodeId {
        coll.children.clear();
        self.push(NodeKind::Collection(coll))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    #[must_use]
    pub fn file(&self, id: NodeId) -> Option<&FileInfo> {
        match &self.nodes[id.0].kind {
            NodeKind::File(f) => Some(f),
            NodeKind::Collection(_) => None,
        }
    }

    pub fn file_mut(&mut self, id: NodeId) -> Option<&mut FileInfo> {
        match &mut self.nodes[id.0].kind {
            NodeKind::File(f) => Some(f),
            NodeKind::Collection(_) => None,
        }
    }

    #[must_use]
    pub fn collection(&self, id: NodeId) -> Option<&FileCollection> {
        match &self.nodes[id.0].kind {
            NodeKind::Collection(c) => Some(c),
            NodeKind::File(_) => None,
        }
    }

    pub fn collection_mut(&mut self, id: NodeId) -> Option<&mut FileCollection> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Collection(c) => Some(c),
            NodeKind::File(_) => None,
        }
    }

    #[must_use]
    pub fn is_file(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::File(_))
    }

    #[must_use]
    pub fn is_reddit(&self, id: NodeId) -> bool {
        self.collection(id).is_some_and(FileCollection::is_reddit)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Direct children; empty for files.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0].kind {
            NodeKind::Collection(c) => &c.children,
            NodeKind::File(_) => &[],
        }
    }

    #[must_use]
    pub fn report(&self, id: NodeId) -> Option<ReportId> {
        self.nodes[id.0].report
    }

    pub fn set_report(&mut self, id: NodeId, report: ReportId) {
        self.nodes[id.0].report = Some(report);
    }

    #[must_use]
    pub fn extractor(&self, id: NodeId) -> ExtractorType {
        match &self.nodes[id.0].kind {
            NodeKind::File(f) => f.extractor,
            NodeKind::Collection(c) => c.extractor,
        }
    }

    /// Page URL of a file or URL of a collection.
    #[must_use]
    pub fn url(&self, id: NodeId) -> &str {
        match &self.nodes[id.0].kind {
            NodeKind::File(f) => &f.page_url,
            NodeKind::Collection(c) => &c.url,
        }
    }

    #[must_use]
    pub fn title(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::File(f) => f.title.as_deref(),
            NodeKind::Collection(c) => c.title.as_deref(),
        }
    }

    #[must_use]
    pub fn node_id_on_page(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::File(f) => f.id.as_deref(),
            NodeKind::Collection(c) => c.id.as_deref(),
        }
    }

    #[must_use]
    pub fn author(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::File(f) => f.author.as_deref(),
            NodeKind::Collection(c) => c.author.as_deref(),
        }
        .filter(|a| !a.is_empty())
    }

    #[must_use]
    pub fn downloaded(&self, id: NodeId) -> DownloadErrorCode {
        match &self.nodes[id.0].kind {
            NodeKind::File(f) => f.downloaded,
            NodeKind::Collection(c) => c.downloaded,
        }
    }

    pub fn set_downloaded(&mut self, id: NodeId, code: DownloadErrorCode) {
        match &mut self.nodes[id.0].kind {
            NodeKind::File(f) => f.downloaded = code,
            NodeKind::Collection(c) => c.downloaded = code,
        }
    }

    /// Cached nearest ancestor that is a reddit collection.
    #[must_use]
    pub fn reddit_info(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].reddit_info
    }

    /// Walks the parent chain looking for the nearest reddit collection.
    #[must_use]
    pub fn nearest_reddit_ancestor(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.nodes[id.0].parent;
        while let Some(node) = current {
            if self.is_reddit(node) {
                return Some(node);
            }
            current = self.nodes[node.0].parent;
        }
        None
    }

    /// Topmost ancestor of `id`, or `id` itself when detached.
    #[must_use]
    pub fn root(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            current = parent;
        }
        current
    }

    /// Whether `ancestor` is `id` or lies on its parent chain.
    fn is_self_or_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.nodes[node.0].parent;
        }
        false
    }

    /// Attaches `child` as the last child of `parent`.
    ///
    /// A node that already has a parent is moved. The reddit-ancestor cache of
    /// the whole moved subtree is recomputed.
    ///
    /// # Errors
    ///
    /// - [`TreeError::InvariantViolation`] if `child` is a reddit collection
    ///   (those are always roots) or the link would create a cycle
    /// - [`TreeError::NotACollection`] if `parent` is a file
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) -> Result<(), TreeError> {
        if self.is_reddit(child) {
            return Err(TreeError::InvariantViolation(format!(
                "reddit collection {} can't have a parent",
                self.url(child)
            )));
        }
        if self.collection(parent).is_none() {
            return Err(TreeError::NotACollection(parent));
        }
        if self.is_self_or_ancestor(child, parent) {
            return Err(TreeError::InvariantViolation(format!(
                "linking {} below {} would create a cycle",
                self.url(child),
                self.url(parent)
            )));
        }

        if let Some(old_parent) = self.nodes[child.0].parent {
            if let Some(coll) = self.collection_mut(old_parent) {
                coll.children.retain(|c| *c != child);
            }
        }
        if let Some(coll) = self.collection_mut(parent) {
            coll.children.push(child);
        }
        self.nodes[child.0].parent = Some(parent);

        let reddit = if self.is_reddit(parent) {
            Some(parent)
        } else {
            self.nodes[parent.0].reddit_info
        };
        self.propagate_reddit_info(child, reddit);
        Ok(())
    }

    fn propagate_reddit_info(&mut self, start: NodeId, reddit: Option<NodeId>) {
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            self.nodes[node.0].reddit_info = reddit;
            stack.extend_from_slice(self.children(node));
        }
    }

    /// Total number of files below `id` (recursive); `1` for a file.
    #[must_use]
    pub fn nr_files(&self, id: NodeId) -> usize {
        match &self.nodes[id.0].kind {
            NodeKind::File(_) => 1,
            NodeKind::Collection(c) => c.children.iter().map(|ch| self.nr_files(*ch)).sum(),
        }
    }

    /// Number of direct children that are files.
    #[must_use]
    pub fn nr_direct_files(&self, id: NodeId) -> usize {
        self.children(id).iter().filter(|c| self.is_file(**c)).count()
    }

    /// All files below `id` in document order.
    #[must_use]
    pub fn descendant_files(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_files(id, &mut out);
        out
    }

    fn collect_files(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if self.is_file(id) {
            out.push(id);
            return;
        }
        for child in self.children(id) {
            self.collect_files(*child, out);
        }
    }

    /// Breadth-first search of the descendants for the first non-empty author.
    #[must_use]
    pub fn first_descendant_author(&self, id: NodeId) -> Option<&str> {
        let mut queue: VecDeque<NodeId> = self.children(id).iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            if let Some(author) = self.author(node) {
                return Some(author);
            }
            queue.extend(self.children(node).iter().copied());
        }
        None
    }

    /// Folder name contributed by a collection; empty for small collections and files.
    #[must_use]
    pub fn subpath(&self, id: NodeId) -> String {
        let Some(coll) = self.collection(id) else {
            return String::new();
        };
        if self.nr_files(id) < MIN_FILES_FOR_SUBPATH {
            return String::new();
        }
        let name = coll
            .title
            .as_deref()
            .or(coll.id.as_deref())
            .unwrap_or_default();
        truncate_chars(&sanitize_component(name), MAX_SUBPATH_LEN)
    }

    /// Non-empty subpaths of all ancestors of `id`, outermost first, joined by `/`.
    #[must_use]
    pub fn full_subpath(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = self.nodes[id.0].parent;
        while let Some(node) = current {
            let sub = self.subpath(node);
            if !sub.is_empty() {
                parts.push(sub);
            }
            current = self.nodes[node.0].parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Relative folder and base filename (without extension) for `id`.
    ///
    /// `file_index` > 0 prefixes the name with a two-digit index.
    #[must_use]
    pub fn generate_filename(&self, id: NodeId, file_index: usize) -> (String, String) {
        let subpath = self.full_subpath(id);
        let prefix = if file_index > 0 {
            format!("{file_index:02}_")
        } else {
            String::new()
        };

        let mut title = self
            .title(id)
            .map(sanitize_component)
            .unwrap_or_default();
        if title.is_empty() {
            title = self
                .node_id_on_page(id)
                .map(sanitize_component)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "untitled".to_string());
        }

        let budget = MAX_RELATIVE_PATH_LEN
            .saturating_sub(subpath.len() + prefix.len())
            .max(MIN_FILENAME_BUDGET);
        let name = format!("{prefix}{}", truncate_chars(&title, budget));
        (subpath, name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn reddit_coll() -> FileCollection {
        FileCollection::new(ExtractorType::Reddit, "https://www.reddit.com/r/gwa/comments/abc/x")
            .with_title(Some("[F4M] A post".to_string()))
            .with_reddit(RedditInfo {
                permalink: "/r/gwa/comments/abc/x".to_string(),
                selftext: None,
                created_utc: Utc::now(),
                subreddit: "gwa".to_string(),
                r_post_url: "https://www.reddit.com/r/gwa/comments/abc/x".to_string(),
                upvotes: None,
                flair: None,
            })
    }

    fn file(n: usize) -> FileInfo {
        FileInfo::new(
            ExtractorType::Soundgasm,
            true,
            "m4a",
            format!("https://soundgasm.net/u/user/{n}"),
            format!("https://media.soundgasm.net/sounds/{n}.m4a"),
        )
        .with_title(Some(format!("File number {n}")))
    }

    #[test]
    fn test_set_parent_updates_reddit_cache_of_subtree() {
        let mut tree = ContentTree::new();
        let reddit = tree.add_collection(reddit_coll());
        let album = tree.add_collection(FileCollection::new(ExtractorType::ImgurAlbum, "https://imgur.com/a/x"));
        let img = tree.add_file(file(1));
        tree.set_parent(img, album).unwrap();
        assert_eq!(tree.reddit_info(img), None);

        tree.set_parent(album, reddit).unwrap();
        assert_eq!(tree.reddit_info(album), Some(reddit));
        assert_eq!(tree.reddit_info(img), Some(reddit));
        assert_eq!(tree.nearest_reddit_ancestor(img), Some(reddit));
        assert_eq!(tree.root(img), reddit);
    }

    #[test]
    fn test_reddit_collection_cannot_get_parent() {
        let mut tree = ContentTree::new();
        let outer = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "https://skittykat.cc/x"));
        let reddit = tree.add_collection(reddit_coll());
        let err = tree.set_parent(reddit, outer).unwrap_err();
        assert!(matches!(err, TreeError::InvariantViolation(_)));
        assert_eq!(tree.parent(reddit), None);
    }

    #[test]
    fn test_set_parent_rejects_cycles_and_file_parents() {
        let mut tree = ContentTree::new();
        let a = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "a"));
        let b = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "b"));
        let f = tree.add_file(file(1));
        tree.set_parent(b, a).unwrap();
        assert!(tree.set_parent(a, b).is_err());
        assert_eq!(tree.set_parent(a, f), Err(TreeError::NotACollection(f)));
    }

    #[test]
    fn test_set_parent_moves_node() {
        let mut tree = ContentTree::new();
        let a = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "a"));
        let b = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "b"));
        let f = tree.add_file(file(1));
        tree.set_parent(f, a).unwrap();
        tree.set_parent(f, b).unwrap();
        assert!(tree.children(a).is_empty());
        assert_eq!(tree.children(b), &[f]);
    }

    #[test]
    fn test_subpath_requires_three_files() {
        let mut tree = ContentTree::new();
        let coll = tree.add_collection(
            FileCollection::new(ExtractorType::SoundgasmUser, "https://soundgasm.net/u/user")
                .with_title(Some("My: Series".to_string())),
        );
        let f1 = tree.add_file(file(1));
        let f2 = tree.add_file(file(2));
        tree.set_parent(f1, coll).unwrap();
        tree.set_parent(f2, coll).unwrap();
        assert_eq!(tree.subpath(coll), "");
        assert_eq!(tree.full_subpath(f1), "");

        let f3 = tree.add_file(file(3));
        tree.set_parent(f3, coll).unwrap();
        assert_eq!(tree.nr_files(coll), 3);
        assert_eq!(tree.subpath(coll), "My_Series");
        assert_eq!(tree.full_subpath(f1), "My_Series");
    }

    #[test]
    fn test_full_subpath_joins_nested_collections() {
        let mut tree = ContentTree::new();
        let outer = tree.add_collection(
            FileCollection::new(ExtractorType::Skittykat, "o").with_title(Some("Outer".into())),
        );
        let inner = tree.add_collection(
            FileCollection::new(ExtractorType::ImgurAlbum, "i").with_title(Some("Inner".into())),
        );
        tree.set_parent(inner, outer).unwrap();
        let mut last = None;
        for n in 0..3 {
            let f = tree.add_file(file(n));
            tree.set_parent(f, inner).unwrap();
            last = Some(f);
        }
        assert_eq!(tree.full_subpath(last.unwrap()), "Outer/Inner");
    }

    #[test]
    fn test_generate_filename_budget_and_prefix() {
        let mut tree = ContentTree::new();
        let long_title = "a".repeat(200);
        let coll = tree.add_collection(
            FileCollection::new(ExtractorType::Skittykat, "c").with_title(Some("b".repeat(100))),
        );
        let mut ids = Vec::new();
        for n in 0..3 {
            let f = tree.add_file(file(n).with_title(Some(long_title.clone())));
            tree.set_parent(f, coll).unwrap();
            ids.push(f);
        }
        let (sub, name) = tree.generate_filename(ids[1], 2);
        assert_eq!(sub.len(), 70);
        assert!(name.starts_with("02_"));
        assert_eq!(name.len(), MAX_RELATIVE_PATH_LEN - 70);

        let single = tree.add_file(file(9).with_title(Some(long_title)));
        let (sub, name) = tree.generate_filename(single, 0);
        assert!(sub.is_empty());
        assert_eq!(name.len(), MAX_RELATIVE_PATH_LEN);
    }

    #[test]
    fn test_generate_filename_keeps_minimum_budget() {
        let mut tree = ContentTree::new();
        let outer = tree.add_collection(
            FileCollection::new(ExtractorType::Skittykat, "o").with_title(Some("o".repeat(80))),
        );
        let inner = tree.add_collection(
            FileCollection::new(ExtractorType::ImgurAlbum, "i").with_title(Some("i".repeat(80))),
        );
        tree.set_parent(inner, outer).unwrap();
        let mut last = None;
        for n in 0..3 {
            let f = tree.add_file(file(n).with_title(Some("t".repeat(100))));
            tree.set_parent(f, inner).unwrap();
            last = Some(f);
        }
        let (sub, name) = tree.generate_filename(last.unwrap(), 0);
        assert_eq!(sub.len(), 141);
        assert_eq!(name.len(), MIN_FILENAME_BUDGET);
    }

    #[test]
    fn test_generate_filename_falls_back_to_id() {
        let mut tree = ContentTree::new();
        let f = tree.add_file(file(1).with_title(Some("♥♥".into())).with_id(Some("xyz".into())));
        assert_eq!(tree.generate_filename(f, 0).1, "xyz");
        let g = tree.add_file(file(2).with_title(None));
        assert_eq!(tree.generate_filename(g, 0).1, "untitled");
    }

    #[test]
    fn test_first_descendant_author_is_breadth_first() {
        let mut tree = ContentTree::new();
        let root = tree.add_collection(FileCollection::new(ExtractorType::Skittykat, "r"));
        let nested = tree.add_collection(FileCollection::new(ExtractorType::ImgurAlbum, "n"));
        let deep = tree.add_file(file(1).with_author(Some("deep".into())));
        let shallow = tree.add_file(file(2).with_author(Some("shallow".into())));
        tree.set_parent(nested, root).unwrap();
        tree.set_parent(deep, nested).unwrap();
        tree.set_parent(shallow, root).unwrap();
        assert_eq!(tree.first_descendant_author(root), Some("shallow"));
    }
}
