//! Settings shared by all extractors of a run.

/// Where each site is reached. Tests point these at a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrls {
    pub reddit: String,
    pub soundgasm: String,
    pub imgur_api: String,
    pub eraudica: String,
    pub whyp_api: String,
    pub erocast: String,
    pub skittykat: String,
}

impl Default for SiteUrls {
    fn default() -> Self {
        Self {
            reddit: "https://www.reddit.com".to_string(),
            soundgasm: "https://soundgasm.net".to_string(),
            imgur_api: "https://api.imgur.com".to_string(),
            eraudica: "https://www.eraudica.com".to_string(),
            whyp_api: "https://api.whyp.it".to_string(),
            erocast: "https://erocast.me".to_string(),
            skittykat: "https://skittykat.cc".to_string(),
        }
    }
}

impl SiteUrls {
    /// Every site at the same base; used with a single mock server.
    #[must_use]
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            reddit: base.clone(),
            soundgasm: base.clone(),
            imgur_api: base.clone(),
            eraudica: base.clone(),
            whyp_api: base.clone(),
            erocast: base.clone(),
            skittykat: base,
        }
    }
}

/// Replaces scheme and host of `url` with `base`, keeping path and query.
///
/// Unparsable URLs are returned unchanged.
#[must_use]
pub fn rebase(base: &str, url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    let mut out = base.trim_end_matches('/').to_string();
    out.push_str(parsed.path());
    if let Some(query) = parsed.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct ExtractorSettings {
    /// Case-insensitive substrings that ban a submission title.
    pub banned_tags: Vec<String>,
    /// `(tag, unless)` pairs: `tag` bans a title only when `unless` is absent.
    pub tag_combos: Vec<(String, String)>,
    pub imgur_client_id: Option<String>,
    pub sites: SiteUrls,
}
