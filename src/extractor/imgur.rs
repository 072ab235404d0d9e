//! imgur albums and single images, via the v3 API for anything not directly linked.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::utils::compile_static_regex;
use super::{ExtractContext, Extractor, ExtractorError, ExtractorType, RedditSubmission};
use crate::content::filename::extension_from_url;
use crate::content::{FileCollection, FileInfo, NodeId};
use crate::download::DownloadError;
use crate::report::{ExtractorErrorCode, ReportId};

const SITE: &str = "imgur";

static ALBUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)^https?://(?:www\.|m\.)?imgur\.com/(?:a|gallery)/(?:[\w-]*-)?([A-Za-z0-9]+)/?(?:[?#].*)?$",
    )
});

static DIRECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^https?://i\.imgur\.com/([A-Za-z0-9]+)\.([A-Za-z0-9]+)(?:[?#].*)?$")
});

static PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^https?://(?:www\.|m\.)?imgur\.com/([A-Za-z0-9]{5,})/?(?:[?#].*)?$")
});

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    images: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    id: String,
    link: String,
    #[serde(default, rename = "type")]
    mime: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl ApiImage {
    fn into_file_info(self) -> FileInfo {
        let ext = extension_from_url(&self.link)
            .or_else(|| {
                self.mime
                    .as_deref()
                    .and_then(|m| m.split('/').nth(1))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "jpg".to_string());
        FileInfo::new(
            ExtractorType::ImgurFile,
            false,
            ext,
            format!("https://imgur.com/{}", self.id),
            self.link,
        )
        .with_id(Some(self.id))
        .with_title(self.title.filter(|t| !t.is_empty()))
        .with_descr(self.description.filter(|d| !d.is_empty()))
    }
}

async fn api_get<T: DeserializeOwned>(
    ctx: &ExtractContext<'_>,
    url: &str,
    path: &str,
) -> Result<T, ExtractorError> {
    let client_id = ctx
        .settings
        .imgur_client_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ExtractorError::no_auth(SITE, "no imgur client id configured"))?;
    let api_url = format!(
        "{}/3/{path}",
        ctx.settings.sites.imgur_api.trim_end_matches('/')
    );
    let auth = format!("Client-ID {client_id}");
    let response: ApiResponse<T> = ctx
        .client
        .get_json(&api_url, &[("Authorization", auth.as_str())])
        .await
        .map_err(|e| match e {
            DownloadError::HttpStatus {
                status: 401 | 403, ..
            } => ExtractorError::no_auth(SITE, "client id rejected"),
            other => ExtractorError::from_fetch(url, other),
        })?;
    Ok(response.data)
}

pub(super) struct ImgurAlbumExtractor;

#[async_trait]
impl Extractor for ImgurAlbumExtractor {
    fn is_compatible(&self, url: &str) -> bool {
        ALBUM_RE.is_match(url)
    }

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        report: ReportId,
        _init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError> {
        let caps = ALBUM_RE
            .captures(url)
            .ok_or_else(|| ExtractorError::info(url, "no album id in url"))?;
        let album_id = caps[1].to_string();
        let album: ApiAlbum = api_get(ctx, url, &format!("album/{album_id}")).await?;

        if album.images.is_empty() {
            ctx.reports
                .set_err_code(report, ExtractorErrorCode::EmptyCollection);
            return Ok(None);
        }

        let coll = ctx.tree.add_collection(
            FileCollection::new(
                ExtractorType::ImgurAlbum,
                format!("https://imgur.com/a/{}", album.id),
            )
            .with_id(Some(album.id))
            .with_title(album.title.filter(|t| !t.is_empty())),
        );
        debug!(images = album.images.len(), "album resolved");
        for image in album.images {
            let file = ctx.tree.add_file(image.into_file_info());
            ctx.tree.set_parent(file, coll)?;
        }
        Ok(Some(coll))
    }
}

pub(super) struct ImgurFileExtractor;

#[async_trait]
impl Extractor for ImgurFileExtractor {
    fn is_compatible(&self, url: &str) -> bool {
        DIRECT_RE.is_match(url) || PAGE_RE.is_match(url)
    }

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        _report: ReportId,
        _init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError> {
        if let Some(caps) = DIRECT_RE.captures(url) {
            let id = caps[1].to_string();
            let ext = caps[2].to_ascii_lowercase();
            let direct_url = format!("https://i.imgur.com/{id}.{ext}");
            let info = FileInfo::new(
                ExtractorType::ImgurFile,
                false,
                ext,
                format!("https://imgur.com/{id}"),
                direct_url,
            )
            .with_id(Some(id));
            return Ok(Some(ctx.tree.add_file(info)));
        }

        let caps = PAGE_RE
            .captures(url)
            .ok_or_else(|| ExtractorError::info(url, "no image id in url"))?;
        let image_id = caps[1].to_string();
        let image: ApiImage = api_get(ctx, url, &format!("image/{image_id}")).await?;
        Ok(Some(ctx.tree.add_file(image.into_file_info())))
    }
}
