//! Filename sanitization and collision handling for downloaded files.
//!
//! Filenames are not stored verbatim in every place that needs them, so the
//! rules here must stay stable: changing them renames files on the next run.

use std::path::Path;

/// Budget for subpath + filename (without extension), in characters.
pub const MAX_RELATIVE_PATH_LEN: usize = 110;

/// The title part of a filename always gets at least this many characters.
pub const MIN_FILENAME_BUDGET: usize = 30;

/// Maximum length of a collection's own folder name.
pub const MAX_SUBPATH_LEN: usize = 70;

/// Highest numeric suffix tried by [`pad_filename_if_exists`].
const MAX_PAD_SUFFIX: usize = 999;

/// Reduces `value` to a conservative ASCII character set.
///
/// Letters, digits, `-`, `.`, `,`, `(`, `)`, `[` and `]` are kept; everything
/// else becomes `_`, runs of `_` are collapsed and leading/trailing `_`, `.`
/// and spaces are trimmed.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        let keep = ch.is_ascii_alphanumeric()
            || matches!(ch, '-' | '.' | ',' | '(' | ')' | '[' | ']');
        if keep {
            out.push(ch);
            prev_sep = false;
        } else if !prev_sep {
            out.push('_');
            prev_sep = true;
        }
    }
    out.trim_matches(|c| c == '_' || c == '.' || c == ' ')
        .to_string()
}

/// Truncates to at most `max_chars` characters, never leaving a trailing `_`.
#[must_use]
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    let truncated: String = value.chars().take(max_chars).collect();
    truncated.trim_end_matches('_').to_string()
}

/// Returns `base` if `dir/base.ext` is free, else the first free `base_NN`.
///
/// Suffixes start at `01`; gaps are filled before higher numbers are used.
#[must_use]
pub fn pad_filename_if_exists(dir: &Path, base: &str, ext: &str) -> String {
    let with_ext = |name: &str| {
        if ext.is_empty() {
            name.to_string()
        } else {
            format!("{name}.{ext}")
        }
    };

    if !dir.join(with_ext(base)).exists() {
        return base.to_string();
    }

    for i in 1..=MAX_PAD_SUFFIX {
        let candidate = format!("{base}_{i:02}");
        if !dir.join(with_ext(&candidate)).exists() {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{base}_{timestamp}")
}

/// Guesses an extension (without dot) from the last path segment of `url`.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index + 1..];
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
