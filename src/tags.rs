use once_cell::sync::Lazy;
use regex::Regex;

/// `#` followed by letters (any script, Hangul included), digits, `_` or `/`.
///
/// The segmenter in [`crate::highlight`] walks content with this same pattern,
/// so parsed tags and rendered tag spans always agree.
pub static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#[\p{L}\p{N}_/]+").expect("valid tag pattern"));

/// Extracts the lowercase tag set of `content` in first-occurrence order.
pub fn parse_tags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for found in TAG_PATTERN.find_iter(content) {
        let tag = normalize_token(found.as_str());
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Stored form of a message's tags: `None` when the content carries no tags.
pub fn derive_tags(content: &str) -> Option<Vec<String>> {
    let tags = parse_tags(content);
    if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

/// Lowercases a raw `#token` (or bare tag name) into its stored form.
pub fn normalize_token(raw: &str) -> String {
    raw.trim_start_matches('#').to_lowercase()
}
