//! erocast.me tracks; the audio is served as an HLS stream.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::settings::rebase;
use super::utils::{compile_static_regex, html_to_text};
use super::{ExtractContext, Extractor, ExtractorError, ExtractorType, RedditSubmission};
use crate::content::{FileInfo, NodeId};
use crate::report::ReportId;

static TRACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^https?://(?:www\.)?erocast\.me/track/(\d+)(?:/[^/?#\s]*)?/?(?:[?#].*)?$")
});

static SONG_DATA_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"var\s+song_data_(\d+)\s*=\s*"));

#[derive(Debug, Deserialize)]
struct SongData {
    id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    file_url: String,
    #[serde(default)]
    user: Option<SongUser>,
}

#[derive(Debug, Deserialize)]
struct SongUser {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Reads the `song_data_<id>` object embedded in the track page.
fn parse_song_data(page_url: &str, html: &str) -> Result<SongData, ExtractorError> {
    let start = SONG_DATA_RE
        .find(html)
        .ok_or_else(|| ExtractorError::info(page_url, "no song data on page"))?
        .end();
    // the object is followed by more script; parse exactly one value
    serde_json::Deserializer::from_str(&html[start..])
        .into_iter::<SongData>()
        .next()
        .ok_or_else(|| ExtractorError::info(page_url, "empty song data"))?
        .map_err(|e| ExtractorError::info(page_url, format!("bad song data: {e}")))
}

fn song_to_file_info(song: SongData) -> FileInfo {
    let author = song
        .user
        .and_then(|u| u.username.or(u.name))
        .filter(|a| !a.is_empty());
    FileInfo::new(
        ExtractorType::Erocast,
        true,
        "m4a",
        format!("https://erocast.me/track/{}", song.id),
        song.file_url,
    )
    .with_id(Some(song.id.to_string()))
    .with_title(Some(song.title).filter(|t| !t.is_empty()))
    .with_descr(
        song.description
            .map(|d| html_to_text(&d))
            .filter(|d| !d.is_empty()),
    )
    .with_author(author)
}

pub(super) struct ErocastExtractor;

#[async_trait]
impl Extractor for ErocastExtractor {
    fn is_compatible(&self, url: &str) -> bool {
        TRACK_RE.is_match(url)
    }

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        _report: ReportId,
        _init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError> {
        let fetch_url = rebase(&ctx.settings.sites.erocast, url);
        let html = ctx
            .client
            .get_text(&fetch_url)
            .await
            .map_err(|e| ExtractorError::from_fetch(url, e))?;
        let song = parse_song_data(url, &html)?;
        Ok(Some(ctx.tree.add_file(song_to_file_info(song))))
    }
}
