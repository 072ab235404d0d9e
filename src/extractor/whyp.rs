//! whyp.it tracks, resolved through the public tracks API.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::utils::{capture, compile_static_regex};
use super::{ExtractContext, Extractor, ExtractorError, ExtractorType, RedditSubmission};
use crate::content::filename::extension_from_url;
use crate::content::{FileInfo, NodeId};
use crate::report::ReportId;

static TRACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^https?://(?:www\.)?whyp\.it/tracks/(\d+)(?:/[^/?#\s]*)?/?(?:[?#].*)?$")
});

#[derive(Debug, Deserialize)]
struct TrackResponse {
    track: Track,
}

#[derive(Debug, Deserialize)]
struct Track {
    id: u64,
    title: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    lossless_url: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
    user: TrackUser,
}

#[derive(Debug, Deserialize)]
struct TrackUser {
    username: String,
}

impl Track {
    fn into_file_info(self, url: &str) -> Result<FileInfo, ExtractorError> {
        // lossless upload if the artist provided one
        let direct_url = self
            .lossless_url
            .filter(|u| !u.is_empty())
            .or(self.audio_url.filter(|u| !u.is_empty()))
            .ok_or_else(|| ExtractorError::info(url, "track has no audio url"))?;
        let ext = extension_from_url(&direct_url).unwrap_or_else(|| "mp3".to_string());
        let page_url = match &self.slug {
            Some(slug) if !slug.is_empty() => format!("https://whyp.it/tracks/{}/{slug}", self.id),
            _ => format!("https://whyp.it/tracks/{}", self.id),
        };
        Ok(
            FileInfo::new(ExtractorType::WhypIt, true, ext, page_url, direct_url)
                .with_id(Some(self.id.to_string()))
                .with_title(Some(self.title).filter(|t| !t.is_empty()))
                .with_descr(self.description.filter(|d| !d.is_empty()))
                .with_author(Some(self.user.username)),
        )
    }
}

pub(super) struct WhypExtractor;

#[async_trait]
impl Extractor for WhypExtractor {
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
        let id = capture(url, &TRACK_RE)
            .ok_or_else(|| ExtractorError::info(url, "no track id in url"))?;
        let api_url = format!(
            "{}/api/tracks/{id}",
            ctx.settings.sites.whyp_api.trim_end_matches('/')
        );
        let response: TrackResponse = ctx
            .client
            .get_json(&api_url, &[])
            .await
            .map_err(|e| ExtractorError::from_fetch(url, e))?;
        let info = response.track.into_file_info(url)?;
        Ok(Some(ctx.tree.add_file(info)))
    }
}
