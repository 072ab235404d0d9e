//! Shared helpers for site extractors: static regexes, HTML scraps, link discovery.

use std::sync::LazyLock;

use regex::Regex;

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static URL_IN_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"https?://[^\s()\[\]<>"'|*]+"#));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));

/// Returns the first capture group of `regex` in `text`, trimmed and non-empty.
#[must_use]
pub fn capture(text: &str, regex: &Regex) -> Option<String> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Decodes the handful of entities the supported sites actually emit.
#[must_use]
pub fn unescape_html(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Strips tags and decodes entities; keeps line breaks of block elements.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let with_breaks = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n");
    let stripped = TAG_RE.replace_all(&with_breaks, "");
    unescape_html(stripped.trim())
}

/// All http(s) URLs in free text (markdown, HTML), in order, without duplicates.
///
/// Trailing punctuation that is almost never part of a link is dropped.
#[must_use]
pub fn find_urls(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    URL_IN_TEXT_RE
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?'])
                .replace("&amp;", "&")
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Last non-empty path segment of `url`.
#[must_use]
pub fn last_path_segment(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .path_segments()?
        .rev()
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
