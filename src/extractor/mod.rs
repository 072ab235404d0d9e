//! Site extractors and the extraction entry point.
//!
//! Every supported site is one [`ExtractorType`] variant backed by a static
//! [`Extractor`] implementation. [`find_extractor`] walks the fixed registry
//! order and returns the first type whose URL pattern matches.
//!
//! # Architecture
//!
//! - [`Extractor`] - Async trait implemented once per site
//! - [`ExtractorType`] - Closed set of sites, in registry order
//! - [`ExtractContext`] - Borrowed run state handed to every extractor
//! - [`BrokenExtractors`] - Sticky per-run registry of failed extractor types
//! - [`extract`] - Runs one extractor, never fails, always yields a report

mod eraudica;
mod erocast;
mod error;
pub mod filter;
mod imgur;
mod reddit;
pub mod settings;
mod skittykat;
mod soundgasm;
mod utils;
mod whyp;

pub use error::ExtractorError;
pub use filter::title_has_banned_tag;
pub use reddit::{RedditSubmission, parse_submission_listing};
pub use settings::{ExtractorSettings, SiteUrls};

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;

use async_trait::async_trait;
use dashmap::DashSet;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::content::{ContentTree, NodeId};
use crate::download::HttpClient;
use crate::report::{ExtractorErrorCode, ReportId, ReportTree};

/// Sites a file can be downloaded from; used to rank mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AudioHost {
    Soundgasm,
    Eraudica,
    Whyp,
    Erocast,
    Skittykat,
}

impl AudioHost {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soundgasm => "soundgasm",
            Self::Eraudica => "eraudica",
            Self::Whyp => "whyp",
            Self::Erocast => "erocast",
            Self::Skittykat => "skittykat",
        }
    }
}

impl fmt::Display for AudioHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioHost {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soundgasm" => Ok(Self::Soundgasm),
            "eraudica" => Ok(Self::Eraudica),
            "whyp" | "whypit" => Ok(Self::Whyp),
            "erocast" => Ok(Self::Erocast),
            "skittykat" => Ok(Self::Skittykat),
            other => Err(format!("unknown audio host '{other}'")),
        }
    }
}

/// One variant per supported site, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractorType {
    Reddit,
    SoundgasmUser,
    Soundgasm,
    ImgurAlbum,
    ImgurFile,
    Eraudica,
    WhypIt,
    Erocast,
    Skittykat,
}

impl ExtractorType {
    /// Registry order; [`find_extractor`] returns the first match.
    pub const REGISTRY: [Self; 9] = [
        Self::Reddit,
        Self::SoundgasmUser,
        Self::Soundgasm,
        Self::ImgurAlbum,
        Self::ImgurFile,
        Self::Eraudica,
        Self::WhypIt,
        Self::Erocast,
        Self::Skittykat,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::SoundgasmUser => "sgasm_user",
            Self::Soundgasm => "sgasm",
            Self::ImgurAlbum => "imgur_album",
            Self::ImgurFile => "imgur_file",
            Self::Eraudica => "eraudica",
            Self::WhypIt => "whyp",
            Self::Erocast => "erocast",
            Self::Skittykat => "skittykat",
        }
    }

    /// Host a file found by this extractor lives on; `None` for non-audio sites.
    #[must_use]
    pub fn audio_host(self) -> Option<AudioHost> {
        match self {
            Self::Soundgasm | Self::SoundgasmUser => Some(AudioHost::Soundgasm),
            Self::Eraudica => Some(AudioHost::Eraudica),
            Self::WhypIt => Some(AudioHost::Whyp),
            Self::Erocast => Some(AudioHost::Erocast),
            Self::Skittykat => Some(AudioHost::Skittykat),
            Self::Reddit | Self::ImgurAlbum | Self::ImgurFile => None,
        }
    }

    /// Pure URL pattern match, no I/O.
    #[must_use]
    pub fn is_compatible(self, url: &str) -> bool {
        self.implementation().is_compatible(url)
    }

    fn implementation(self) -> &'static dyn Extractor {
        match self {
            Self::Reddit => &reddit::RedditExtractor,
            Self::SoundgasmUser => &soundgasm::SoundgasmUserExtractor,
            Self::Soundgasm => &soundgasm::SoundgasmExtractor,
            Self::ImgurAlbum => &imgur::ImgurAlbumExtractor,
            Self::ImgurFile => &imgur::ImgurFileExtractor,
            Self::Eraudica => &eraudica::EraudicaExtractor,
            Self::WhypIt => &whyp::WhypExtractor,
            Self::Erocast => &erocast::ErocastExtractor,
            Self::Skittykat => &skittykat::SkittykatExtractor,
        }
    }
}

impl fmt::Display for ExtractorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// First extractor type in registry order that accepts `url`.
#[must_use]
pub fn find_extractor(url: &str) -> Option<ExtractorType> {
    ExtractorType::REGISTRY
        .into_iter()
        .find(|kind| kind.is_compatible(url))
}

/// Extractor types that failed in a way that makes further calls pointless.
///
/// Once marked, a type stays broken for the rest of the run.
#[derive(Debug, Default)]
pub struct BrokenExtractors {
    broken: DashSet<ExtractorType>,
}

impl BrokenExtractors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, kind: ExtractorType) {
        if self.broken.insert(kind) {
            warn!(extractor = %kind, "extractor marked broken for the rest of the run");
        }
    }

    #[must_use]
    pub fn is_broken(&self, kind: ExtractorType) -> bool {
        self.broken.contains(&kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.broken.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.broken.is_empty()
    }
}

/// Run state every extractor works against.
pub struct ExtractContext<'a> {
    pub client: &'a HttpClient,
    pub settings: &'a ExtractorSettings,
    pub broken: &'a BrokenExtractors,
    pub tree: &'a mut ContentTree,
    pub reports: &'a mut ReportTree,
}

/// Contract implemented by each site.
///
/// `extract_info` receives the report created for `url` and may set a warning
/// or error code on it (or append child reports). Returning `Ok(None)` means
/// nothing downloadable was produced; the report code explains why.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn is_compatible(&self, url: &str) -> bool;

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        report: ReportId,
        init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError>;
}

/// Runs the extractor for `kind` on `url`.
///
/// Never fails: every outcome is encoded in the returned report. On success
/// the node is attached below `parent`; the report is appended to
/// `parent_report` in every case.
#[tracing::instrument(skip(kind, ctx, parent, parent_report, init_from), fields(extractor = %kind))]
pub async fn extract(
    kind: ExtractorType,
    ctx: &mut ExtractContext<'_>,
    url: &str,
    parent: Option<NodeId>,
    parent_report: Option<ReportId>,
    init_from: Option<RedditSubmission>,
) -> (Option<NodeId>, ReportId) {
    run_extractor(kind, kind.implementation(), ctx, url, parent, parent_report, init_from).await
}

async fn run_extractor(
    kind: ExtractorType,
    extractor: &dyn Extractor,
    ctx: &mut ExtractContext<'_>,
    url: &str,
    parent: Option<NodeId>,
    parent_report: Option<ReportId>,
    init_from: Option<RedditSubmission>,
) -> (Option<NodeId>, ReportId) {
    let report = ctx.reports.create(url, ExtractorErrorCode::NoErrors);

    let node = if ctx.broken.is_broken(kind) {
        warn!(url, "skipping url, extractor is broken");
        ctx.reports
            .set_err_code(report, ExtractorErrorCode::BrokenExtractor);
        None
    } else {
        let outcome = AssertUnwindSafe(extractor.extract_info(url, &mut *ctx, report, init_from))
        .catch_unwind()
        .await;

        match outcome {
            Ok(Ok(Some(node))) => attach(kind, ctx, url, node, parent, report),
            Ok(Ok(None)) => {
                debug!(url, code = %ctx.reports.get(report).err_code, "nothing extracted");
                None
            }
            Ok(Err(err)) => {
                let code = classify_failure(kind, ctx.broken, url, &err);
                ctx.reports.set_err_code(report, code);
                None
            }
            Err(panic) => {
                error!(
                    url,
                    panic = %panic_message(panic.as_ref()),
                    "extractor panicked"
                );
                ctx.broken.mark(kind);
                ctx.reports
                    .set_err_code(report, ExtractorErrorCode::BrokenExtractor);
                None
            }
        }
    };

    if let Some(parent_report) = parent_report {
        ctx.reports.add_child(parent_report, report);
    }
    if node.is_some() {
        info!(url, "extracted");
    }
    (node, report)
}

fn attach(
    kind: ExtractorType,
    ctx: &mut ExtractContext<'_>,
    url: &str,
    node: NodeId,
    parent: Option<NodeId>,
    report: ReportId,
) -> Option<NodeId> {
    ctx.tree.set_report(node, report);
    if let Some(parent) = parent {
        if let Err(err) = ctx.tree.set_parent(node, parent) {
            error!(url, error = %err, "extractor produced a node that can't be linked");
            ctx.broken.mark(kind);
            ctx.reports
                .set_err_code(report, ExtractorErrorCode::BrokenExtractor);
            return None;
        }
    }
    Some(node)
}

fn classify_failure(
    kind: ExtractorType,
    broken: &BrokenExtractors,
    url: &str,
    err: &ExtractorError,
) -> ExtractorErrorCode {
    match err {
        ExtractorError::NoResponse { .. } => {
            warn!(url, error = %err, "no response");
            ExtractorErrorCode::NoResponse
        }
        ExtractorError::NoAuthentication { .. } => {
            error!(url, error = %err, "authentication failed");
            broken.mark(kind);
            ExtractorErrorCode::NoAuthentication
        }
        ExtractorError::InfoExtraction { .. } => {
            error!(url, error = %err, "info extraction failed, site layout may have changed");
            broken.mark(kind);
            ExtractorErrorCode::BrokenExtractor
        }
        ExtractorError::Tree(_) | ExtractorError::Other { .. } => {
            error!(url, error = ?err, "unexpected extractor failure");
            broken.mark(kind);
            ExtractorErrorCode::BrokenExtractor
        }
    }
}

/// Extracts every supported link found on a collection page below `parent`.
///
/// Reddit submissions and whole soundgasm user listings are recorded as
/// `STOP_RECURSION` instead of being followed, as are links back to `origin`.
/// Unsupported links are skipped. Returns the number of links not followed
/// for those reasons.
pub(crate) async fn follow_links(
    ctx: &mut ExtractContext<'_>,
    links: &[String],
    origin: ExtractorType,
    parent: NodeId,
    parent_report: ReportId,
) -> usize {
    let mut stopped = 0;
    for link in links {
        let Some(kind) = find_extractor(link) else {
            debug!(url = %link, "no extractor for embedded link");
            continue;
        };
        if kind == origin || matches!(kind, ExtractorType::Reddit | ExtractorType::SoundgasmUser)
        {
            debug!(url = %link, extractor = %kind, "not following link");
            let stop = ctx
                .reports
                .create(link.as_str(), ExtractorErrorCode::StopRecursion);
            ctx.reports.add_child(parent_report, stop);
            stopped += 1;
            continue;
        }
        extract(kind, ctx, link, Some(parent), Some(parent_report), None).await;
    }
    stopped
}

/// Whether any file below `id` is an audio file.
pub(crate) fn has_audio_descendant(tree: &ContentTree, id: NodeId) -> bool {
    tree.descendant_files(id)
        .into_iter()
        .any(|f| tree.file(f).is_some_and(|info| info.is_audio))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
