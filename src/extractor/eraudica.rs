//! eraudica.com audio pages.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::settings::rebase;
use super::utils::{capture, compile_static_regex, html_to_text, unescape_html};
use super::{ExtractContext, Extractor, ExtractorError, ExtractorType, RedditSubmission};
use crate::content::filename::extension_from_url;
use crate::content::{FileInfo, NodeId};
use crate::report::ReportId;

/// Every file on the site is published by the same account.
const AUTHOR: &str = "Eves-garden";

static PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)^https?://(?:www\.)?eraudica\.com/e/eve/(\d{4})/([^/?#\s]+)/?(?:[?#].*)?$",
    )
});

static SOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?s)<source[^>]*\ssrc="([^"]+)""#));

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?s)<title>(.*?)</title>"));

static DESCR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<div\s+class="[^"]*description[^"]*"[^>]*>(.*?)</div>"#)
});

fn parse_page(page_url: &str, html: &str) -> Result<FileInfo, ExtractorError> {
    let caps = PAGE_RE
        .captures(page_url)
        .ok_or_else(|| ExtractorError::info(page_url, "not an eraudica audio url"))?;
    let canonical = format!("https://www.eraudica.com/e/eve/{}/{}", &caps[1], &caps[2]);
    let slug = caps[2].to_string();

    let src = capture(html, &SOURCE_RE)
        .ok_or_else(|| ExtractorError::info(page_url, "no audio source on page"))?;
    let direct_url = url::Url::parse(&canonical)
        .and_then(|base| base.join(&unescape_html(&src)))
        .map_err(|e| ExtractorError::info(page_url, format!("bad audio source '{src}': {e}")))?
        .to_string();
    let ext = extension_from_url(&direct_url).unwrap_or_else(|| "mp3".to_string());

    let title = capture(html, &TITLE_RE).map(|t| {
        let t = unescape_html(&t);
        t.trim_end_matches(" - Eraudica")
            .trim_end_matches(" | Eraudica")
            .trim()
            .to_string()
    });
    let descr = capture(html, &DESCR_RE)
        .map(|d| html_to_text(&d))
        .filter(|d| !d.is_empty());

    Ok(
        FileInfo::new(ExtractorType::Eraudica, true, ext, canonical, direct_url)
            .with_id(Some(slug))
            .with_title(title.filter(|t| !t.is_empty()))
            .with_descr(descr)
            .with_author(Some(AUTHOR.to_string())),
    )
}

pub(super) struct EraudicaExtractor;

#[async_trait]
impl Extractor for EraudicaExtractor {
    fn is_compatible(&self, url: &str) -> bool {
        PAGE_RE.is_match(url)
    }

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        _report: ReportId,
        _init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError> {
        let fetch_url = rebase(&ctx.settings.sites.eraudica, url);
        let html = ctx
            .client
            .get_text(&fetch_url)
            .await
            .map_err(|e| ExtractorError::from_fetch(url, e))?;
        let info = parse_page(url, &html)?;
        Ok(Some(ctx.tree.add_file(info)))
    }
}
