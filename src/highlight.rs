use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use crate::tags::{normalize_token, TAG_PATTERN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Tag { raw: &'a str, tag: String },
}

impl<'a> Segment<'a> {
    /// The exact slice of the message content this segment covers.
    pub fn raw(&self) -> &'a str {
        match self {
            Segment::Text(text) => text,
            Segment::Tag { raw, .. } => raw,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Segment::Text(_) => None,
            Segment::Tag { tag, .. } => Some(tag),
        }
    }
}

/// Splits message content into alternating plain-text and `#tag` spans.
pub fn segment(content: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut last = 0;
    for found in TAG_PATTERN.find_iter(content) {
        if found.start() > last {
            segments.push(Segment::Text(&content[last..found.start()]));
        }
        segments.push(Segment::Tag {
            raw: found.as_str(),
            tag: normalize_token(found.as_str()),
        });
        last = found.end();
    }
    if last < content.len() {
        segments.push(Segment::Text(&content[last..]));
    }
    segments
}

pub fn build_highlight_regex(tokens: &[String]) -> Option<Regex> {
    if tokens.is_empty() {
        return None;
    }
    let mut unique = Vec::new();
    let mut seen = HashSet::new();
    for token in tokens {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if seen.insert(token.to_lowercase()) {
            unique.push(token.to_string());
        }
    }
    if unique.is_empty() {
        return None;
    }
    unique.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = unique
        .into_iter()
        .map(|token| regex::escape(&token))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}
