//! soundgasm.net: single audio pages and whole user listings.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::settings::rebase;
use super::utils::{capture, compile_static_regex, html_to_text, unescape_html};
use super::{ExtractContext, Extractor, ExtractorError, ExtractorType, RedditSubmission, extract};
use crate::content::filename::extension_from_url;
use crate::content::{FileCollection, FileInfo, NodeId};
use crate::report::{ExtractorErrorCode, ReportId};

static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)^https?://(?:www\.)?soundgasm\.net/u/([-\w]+)/([^/?#\s]+)/?(?:[?#].*)?$",
    )
});

static USER_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^https?://(?:www\.)?soundgasm\.net/u/([-\w]+)/?(?:[?#].*)?$")
});

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?s)<div\s+aria-label="title"[^>]*>(.*?)</div>"#));

static DESCR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<div\s+class="jp-description"[^>]*>(.*?)</div>"#)
});

static AUDIO_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"m4a:\s*"([^"]+)""#));

static USER_FILE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"https?://(?:www\.)?soundgasm\.net/u/[-\w]+/[^"'\s<>/?#]+"#)
});

fn canonical_file_url(user: &str, slug: &str) -> String {
    format!("https://soundgasm.net/u/{user}/{slug}")
}

/// Builds the file of an audio page from its HTML.
fn parse_audio_page(page_url: &str, html: &str) -> Result<FileInfo, ExtractorError> {
    let caps = FILE_RE
        .captures(page_url)
        .ok_or_else(|| ExtractorError::info(page_url, "not a soundgasm audio url"))?;
    let user = caps[1].to_string();
    let slug = caps[2].to_string();

    let direct_url = capture(html, &AUDIO_RE)
        .ok_or_else(|| ExtractorError::info(page_url, "no audio source on page"))?;
    let ext = extension_from_url(&direct_url).unwrap_or_else(|| "m4a".to_string());
    let title = capture(html, &TITLE_RE).map(|t| unescape_html(&t));
    let descr = capture(html, &DESCR_RE)
        .map(|d| html_to_text(&d))
        .filter(|d| !d.is_empty());

    Ok(FileInfo::new(
        ExtractorType::Soundgasm,
        true,
        ext,
        canonical_file_url(&user, &slug),
        direct_url,
    )
    .with_id(Some(slug))
    .with_title(title)
    .with_descr(descr)
    .with_author(Some(user)))
}

/// Audio page links of a user listing, in page order.
fn parse_user_listing(html: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for m in USER_FILE_LINK_RE.find_iter(html) {
        let link = m.as_str().to_string();
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

pub(super) struct SoundgasmExtractor;

#[async_trait]
impl Extractor for SoundgasmExtractor {
    fn is_compatible(&self, url: &str) -> bool {
        FILE_RE.is_match(url)
    }

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        _report: ReportId,
        _init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError> {
        let fetch_url = rebase(&ctx.settings.sites.soundgasm, url);
        let html = ctx
            .client
            .get_text(&fetch_url)
            .await
            .map_err(|e| ExtractorError::from_fetch(url, e))?;
        let info = parse_audio_page(url, &html)?;
        debug!(title = ?info.title, "found soundgasm audio");
        Ok(Some(ctx.tree.add_file(info)))
    }
}

pub(super) struct SoundgasmUserExtractor;

#[async_trait]
impl Extractor for SoundgasmUserExtractor {
    fn is_compatible(&self, url: &str) -> bool {
        USER_RE.is_match(url)
    }

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        report: ReportId,
        _init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError> {
        let user = capture(url, &USER_RE)
            .ok_or_else(|| ExtractorError::info(url, "no user in url"))?;
        let fetch_url = rebase(&ctx.settings.sites.soundgasm, url);
        let html = ctx
            .client
            .get_text(&fetch_url)
            .await
            .map_err(|e| ExtractorError::from_fetch(url, e))?;

        let links = parse_user_listing(&html);
        if links.is_empty() {
            info!(user = %user, "user has no uploads");
            ctx.reports
                .set_err_code(report, ExtractorErrorCode::EmptyCollection);
            return Ok(None);
        }

        let coll = ctx.tree.add_collection(
            FileCollection::new(
                ExtractorType::SoundgasmUser,
                format!("https://soundgasm.net/u/{user}"),
            )
            .with_id(Some(user.clone()))
            .with_title(Some(user.clone()))
            .with_author(Some(user)),
        );
        info!(files = links.len(), "extracting user listing");
        for link in &links {
            extract(
                ExtractorType::Soundgasm,
                ctx,
                link,
                Some(coll),
                Some(report),
                None,
            )
            .await;
        }
        Ok((!ctx.tree.children(coll).is_empty()).then_some(coll))
    }
}
