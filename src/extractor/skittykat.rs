//! skittykat.cc exclusive posts: embedded audio, gallery images and links to other hosts.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::settings::rebase;
use super::utils::{capture, compile_static_regex, find_urls, html_to_text, unescape_html};
use super::{
    ExtractContext, Extractor, ExtractorError, ExtractorType, RedditSubmission, find_extractor,
    follow_links, has_audio_descendant,
};
use crate::content::filename::extension_from_url;
use crate::content::{FileCollection, FileInfo, NodeId};
use crate::report::{ExtractorErrorCode, ReportId};

const AUTHOR: &str = "skittykat";

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

static POST_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)^https?://(?:www\.)?skittykat\.cc/exclusive/([^/?#\s]+)/?(?:[?#].*)?$",
    )
});

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?s)<h1[^>]*>(.*?)</h1>"));

static CONTENT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?s)<article[^>]*>(.*?)</article>"));

static SOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"<source[^>]*\ssrc="([^"]+)""#));

static IMG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"<img[^>]*\ssrc="([^"]+)""#));

/// What a post page contains, before anything is added to the tree.
#[derive(Debug, Default)]
struct PostPage {
    title: Option<String>,
    audio: Vec<String>,
    images: Vec<String>,
    links: Vec<String>,
}

fn absolutize(base: &url::Url, src: &str) -> Option<String> {
    base.join(&unescape_html(src)).ok().map(|u| u.to_string())
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn parse_post(page_url: &str, html: &str) -> Result<PostPage, ExtractorError> {
    let base = url::Url::parse(page_url)
        .map_err(|e| ExtractorError::info(page_url, format!("bad page url: {e}")))?;
    let content = capture(html, &CONTENT_RE).unwrap_or_else(|| html.to_string());

    let mut page = PostPage {
        title: capture(html, &TITLE_RE)
            .map(|t| html_to_text(&t))
            .filter(|t| !t.is_empty()),
        ..PostPage::default()
    };

    for caps in SOURCE_RE.captures_iter(&content) {
        if let Some(src) = absolutize(&base, &caps[1]) {
            push_unique(&mut page.audio, src);
        }
    }
    for caps in IMG_RE.captures_iter(&content) {
        let Some(src) = absolutize(&base, &caps[1]) else {
            continue;
        };
        let is_image = extension_from_url(&src)
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
        if is_image {
            push_unique(&mut page.images, src);
        }
    }
    for link in find_urls(&content) {
        if find_extractor(&link).is_some()
            && !page.audio.contains(&link)
            && !page.images.contains(&link)
        {
            push_unique(&mut page.links, link);
        }
    }
    Ok(page)
}

pub(super) struct SkittykatExtractor;

#[async_trait]
impl Extractor for SkittykatExtractor {
    fn is_compatible(&self, url: &str) -> bool {
        POST_RE.is_match(url)
    }

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        report: ReportId,
        _init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError> {
        let slug = capture(url, &POST_RE)
            .ok_or_else(|| ExtractorError::info(url, "no post slug in url"))?;
        let canonical = format!("https://skittykat.cc/exclusive/{slug}/");
        let fetch_url = rebase(&ctx.settings.sites.skittykat, url);
        let html = ctx
            .client
            .get_text(&fetch_url)
            .await
            .map_err(|e| ExtractorError::from_fetch(url, e))?;
        let page = parse_post(&canonical, &html)?;
        debug!(
            audio = page.audio.len(),
            images = page.images.len(),
            links = page.links.len(),
            "parsed post"
        );

        let coll = ctx.tree.add_collection(
            FileCollection::new(ExtractorType::Skittykat, canonical.clone())
                .with_id(Some(slug.clone()))
                .with_title(page.title.clone())
                .with_author(Some(AUTHOR.to_string())),
        );

        for (idx, src) in page.audio.iter().enumerate() {
            let ext = extension_from_url(src).unwrap_or_else(|| "mp3".to_string());
            let page_url = if idx == 0 {
                canonical.clone()
            } else {
                format!("{canonical}#audio{idx}")
            };
            let file = ctx.tree.add_file(
                FileInfo::new(ExtractorType::Skittykat, true, ext, page_url, src.clone())
                    .with_id(Some(slug.clone()))
                    .with_title(page.title.clone())
                    .with_author(Some(AUTHOR.to_string())),
            );
            ctx.tree.set_parent(file, coll)?;
        }
        for src in &page.images {
            let ext = extension_from_url(src).unwrap_or_else(|| "jpg".to_string());
            let file = ctx.tree.add_file(
                FileInfo::new(ExtractorType::Skittykat, false, ext, src.clone(), src.clone())
                    .with_author(Some(AUTHOR.to_string())),
            );
            ctx.tree.set_parent(file, coll)?;
        }

        let stopped =
            follow_links(ctx, &page.links, ExtractorType::Skittykat, coll, report).await;

        if !has_audio_descendant(ctx.tree, coll) && stopped == 0 {
            info!(url, "no supported audio on post");
            ctx.reports
                .set_err_code(report, ExtractorErrorCode::NoSupportedAudioLink);
        }
        Ok((!ctx.tree.children(coll).is_empty()).then_some(coll))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const POST: &str = r#"<html><body>
        <header><a href="https://skittykat.cc/exclusive/other-post/">Other</a></header>
        <h1 class="entry-title">Cozy &amp; Warm</h1>
        <article class="post">
          <audio controls><source src="/wp-content/uploads/cozy.mp3" type="audio/mpeg"></audio>
          <p>Also on <a href="https://soundgasm.net/u/skitty/Cozy-Warm">soundgasm</a>
             and <a href="https://www.reddit.com/r/gonewildaudio/comments/xyz789/cozy/">reddit</a>.</p>
          <div class="gallery">
            <img src="https://skittykat.cc/wp-content/uploads/cozy1.jpg">
            <img src="https://skittykat.cc/wp-content/uploads/icon.svg">
          </div>
        </article>
    </body></html>"#;

    #[test]
    fn test_is_compatible() {
        let ex = SkittykatExtractor;
        assert!(ex.is_compatible("https://skittykat.cc/exclusive/some-post/"));
        assert!(ex.is_compatible("https://www.skittykat.cc/exclusive/some-post"));
        assert!(!ex.is_compatible("https://skittykat.cc/about/"));
    }

    #[test]
    fn test_parse_post_restricts_to_article() {
        let page = parse_post("https://skittykat.cc/exclusive/cozy/", POST).unwrap();
        assert_eq!(page.title.as_deref(), Some("Cozy & Warm"));
        assert_eq!(
            page.audio,
            vec!["https://skittykat.cc/wp-content/uploads/cozy.mp3"]
        );
        assert_eq!(
            page.images,
            vec!["https://skittykat.cc/wp-content/uploads/cozy1.jpg"]
        );
        assert_eq!(
            page.links,
            vec![
                "https://soundgasm.net/u/skitty/Cozy-Warm",
                "https://www.reddit.com/r/gonewildaudio/comments/xyz789/cozy/"
            ]
        );
    }
}
