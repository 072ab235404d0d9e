//! Title-based content filtering.

/// Whether `title` contains a banned tag.
///
/// Matching is a case-insensitive substring test. A combo `(tag, unless)`
/// bans the title when it contains `tag` but not `unless`.
#[must_use]
pub fn title_has_banned_tag(title: &str, banned: &[String], combos: &[(String, String)]) -> bool {
    let title = title.to_lowercase();
    if banned
        .iter()
        .any(|tag| !tag.is_empty() && title.contains(&tag.to_lowercase()))
    {
        return true;
    }
    combos.iter().any(|(tag, unless)| {
        title.contains(&tag.to_lowercase()) && !title.contains(&unless.to_lowercase())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_banned_tag_is_case_insensitive() {
        let banned = tags(&["[M4M]", "[m4f]"]);
        assert!(title_has_banned_tag("[m4m] Something", &banned, &[]));
        assert!(title_has_banned_tag("Hello [M4F] there", &banned, &[]));
        assert!(!title_has_banned_tag("[F4M] Something", &banned, &[]));
    }

    #[test]
    fn test_combo_bans_only_without_partner() {
        let combos = vec![("[request]".to_string(), "[F4M]".to_string())];
        assert!(title_has_banned_tag("[Request] anything", &[], &combos));
        assert!(!title_has_banned_tag("[Request] [f4m] anything", &[], &combos));
        assert!(!title_has_banned_tag("[F4M] plain", &[], &combos));
    }

    #[test]
    fn test_empty_lists_ban_nothing() {
        assert!(!title_has_banned_tag("[M4M]", &[], &[]));
    }
}
