//! Reddit submissions: the post itself plus every supported link it carries.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use super::utils::{capture, compile_static_regex, find_urls};
use super::{
    ExtractContext, Extractor, ExtractorError, ExtractorType, follow_links, has_audio_descendant,
    title_has_banned_tag,
};
use crate::content::{FileCollection, NodeId, RedditInfo};
use crate::report::{ExtractorErrorCode, ReportId};

static SUBMISSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)^https?://(?:(?:[a-z0-9]+\.)?reddit\.com/r/[^/]+/comments/|(?:www\.)?redd\.it/)([a-z0-9]+)",
    )
});

const DELETED_AUTHOR: &str = "[deleted]";

/// Submission fields as returned by the reddit JSON API.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditSubmission {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub selftext: String,
    pub url: String,
    pub permalink: String,
    pub subreddit: String,
    pub created_utc: f64,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub is_self: bool,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    children: Vec<ListingChild>,
}

#[derive(Deserialize)]
struct ListingChild {
    data: RedditSubmission,
}

/// Parses the body of `/comments/<id>.json`: an array whose first listing
/// holds the submission.
///
/// # Errors
///
/// A description of what was missing when the body doesn't have that shape.
pub fn parse_submission_listing(body: &str) -> Result<RedditSubmission, String> {
    let listings: Vec<Listing> =
        serde_json::from_str(body).map_err(|e| format!("unexpected listing json: {e}"))?;
    listings
        .into_iter()
        .next()
        .and_then(|listing| listing.data.children.into_iter().next())
        .map(|child| child.data)
        .ok_or_else(|| "listing contains no submission".to_string())
}

impl RedditSubmission {
    fn full_permalink(&self) -> String {
        format!("https://www.reddit.com{}", self.permalink)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn created(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_utc as i64, 0).unwrap_or_default()
    }

    fn reddit_info(&self) -> RedditInfo {
        let permalink = self.full_permalink();
        RedditInfo {
            r_post_url: if self.is_self {
                permalink.clone()
            } else {
                self.url.clone()
            },
            permalink,
            selftext: Some(self.selftext.clone()).filter(|s| !s.trim().is_empty()),
            created_utc: self.created(),
            subreddit: self.subreddit.clone(),
            upvotes: self.score,
            flair: self.link_flair_text.clone().filter(|s| !s.is_empty()),
        }
    }

    /// Outgoing links: the link target of a link post, then links in the selftext.
    fn links(&self) -> Vec<String> {
        let mut links = Vec::new();
        if !self.is_self && !self.url.is_empty() {
            links.push(self.url.clone());
        }
        for link in find_urls(&self.selftext) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
        links
    }
}

pub(super) struct RedditExtractor;

#[async_trait]
impl Extractor for RedditExtractor {
    fn is_compatible(&self, url: &str) -> bool {
        SUBMISSION_RE.is_match(url)
    }

    async fn extract_info(
        &self,
        url: &str,
        ctx: &mut ExtractContext<'_>,
        report: ReportId,
        init_from: Option<RedditSubmission>,
    ) -> Result<Option<NodeId>, ExtractorError> {
        let submission = match init_from {
            Some(submission) => submission,
            None => fetch_submission(url, ctx).await?,
        };

        if title_has_banned_tag(
            &submission.title,
            &ctx.settings.banned_tags,
            &ctx.settings.tag_combos,
        ) {
            info!(title = %submission.title, "submission has a banned tag, skipping");
            ctx.reports
                .set_err_code(report, ExtractorErrorCode::BannedTag);
            return Ok(None);
        }

        let author = Some(submission.author.clone()).filter(|a| a != DELETED_AUTHOR);
        let coll = ctx.tree.add_collection(
            FileCollection::new(ExtractorType::Reddit, submission.full_permalink())
                .with_id(Some(submission.id.clone()))
                .with_title(Some(submission.title.clone()))
                .with_author(author)
                .with_reddit(submission.reddit_info()),
        );

        let links = submission.links();
        debug!(links = links.len(), "following submission links");
        let stopped = follow_links(ctx, &links, ExtractorType::Reddit, coll, report).await;

        let has_children = !ctx.tree.children(coll).is_empty();
        if !has_audio_descendant(ctx.tree, coll) && stopped == 0 {
            info!(url, "no supported audio link in submission");
            ctx.reports
                .set_err_code(report, ExtractorErrorCode::NoSupportedAudioLink);
        }
        Ok(has_children.then_some(coll))
    }
}

async fn fetch_submission(
    url: &str,
    ctx: &ExtractContext<'_>,
) -> Result<RedditSubmission, ExtractorError> {
    let id = capture(url, &SUBMISSION_RE)
        .ok_or_else(|| ExtractorError::info(url, "no submission id in url"))?;
    let api_url = format!(
        "{}/comments/{id}.json?raw_json=1",
        ctx.settings.sites.reddit.trim_end_matches('/')
    );
    let body = ctx
        .client
        .get_text(&api_url)
        .await
        .map_err(|e| ExtractorError::from_fetch(&api_url, e))?;
    parse_submission_listing(&body).map_err(|reason| ExtractorError::info(&api_url, reason))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const LISTING: &str = r#"[
        {"kind": "Listing", "data": {"children": [{"kind": "t3", "data": {
            "id": "abc123",
            "title": "[F4M] A title",
            "author": "some_author",
            "selftext": "Listen [here](https://soundgasm.net/u/some_author/A-title). Also https://whyp.it/tracks/42/a-title",
            "url": "https://www.reddit.com/r/gonewildaudio/comments/abc123/f4m_a_title/",
            "permalink": "/r/gonewildaudio/comments/abc123/f4m_a_title/",
            "subreddit": "gonewildaudio",
            "created_utc": 1600000000.0,
            "score": 321,
            "link_flair_text": null,
            "is_self": true
        }}]}},
        {"kind": "Listing", "data": {"children": []}}
    ]"#;

    #[test]
    fn test_is_compatible() {
        let ex = RedditExtractor;
        assert!(ex.is_compatible("https://www.reddit.com/r/gonewildaudio/comments/abc123/title/"));
        assert!(ex.is_compatible("https://old.reddit.com/r/gonewildaudio/comments/abc123"));
        assert!(ex.is_compatible("https://redd.it/abc123"));
        assert!(!ex.is_compatible("https://www.reddit.com/user/someone"));
        assert!(!ex.is_compatible("https://www.reddit.com/r/gonewildaudio/"));
    }

    #[test]
    fn test_parse_submission_listing() {
        let sub = parse_submission_listing(LISTING).unwrap();
        assert_eq!(sub.id, "abc123");
        assert_eq!(sub.score, Some(321));
        assert!(sub.is_self);

        let info = sub.reddit_info();
        assert_eq!(
            info.permalink,
            "https://www.reddit.com/r/gonewildaudio/comments/abc123/f4m_a_title/"
        );
        assert_eq!(info.r_post_url, info.permalink);
        assert_eq!(info.created_utc.timestamp(), 1_600_000_000);
        assert!(info.selftext.is_some());
        assert_eq!(info.flair, None);
    }

    #[test]
    fn test_links_skip_self_url() {
        let sub = parse_submission_listing(LISTING).unwrap();
        assert_eq!(
            sub.links(),
            vec![
                "https://soundgasm.net/u/some_author/A-title",
                "https://whyp.it/tracks/42/a-title"
            ]
        );
    }

    #[test]
    fn test_link_post_puts_target_first() {
        let mut sub = parse_submission_listing(LISTING).unwrap();
        sub.is_self = false;
        sub.url = "https://soundgasm.net/u/other/Post".to_string();
        sub.selftext = String::new();
        assert_eq!(sub.links(), vec!["https://soundgasm.net/u/other/Post"]);
        assert_eq!(sub.reddit_info().r_post_url, "https://soundgasm.net/u/other/Post");
        assert_eq!(sub.reddit_info().selftext, None);
    }

    #[test]
    fn test_parse_rejects_empty_listing() {
        assert!(parse_submission_listing("[]").is_err());
        assert!(parse_submission_listing("{}").is_err());
    }
}
