use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::format_description::FormatItem;
use time::OffsetDateTime;

use crate::tags;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as Timestamp
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub created_at: Timestamp,
}

impl Server {
    pub fn new(id: String, name: &str, icon: Option<&str>, created_at: Timestamp) -> Self {
        let icon = icon
            .map(str::trim)
            .filter(|icon| !icon.is_empty())
            .map(str::to_string)
            .or_else(|| default_icon(name));
        Self {
            id,
            name: name.to_string(),
            icon,
            created_at,
        }
    }

    pub fn icon_or_default(&self) -> String {
        self.icon
            .clone()
            .or_else(|| default_icon(&self.name))
            .unwrap_or_else(|| "?".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub created_at: Timestamp,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub content: String,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
    pub tags: Option<Vec<String>>,
    pub is_pinned: Option<bool>,
    pub is_bookmarked: Option<bool>,
}

impl Message {
    pub fn new(id: String, channel_id: &str, content: &str, created_at: Timestamp) -> Self {
        Self {
            id,
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            created_at,
            edited_at: None,
            tags: tags::derive_tags(content),
            is_pinned: None,
            is_bookmarked: None,
        }
    }

    /// Replaces the content and re-derives the tag set.
    pub fn set_content(&mut self, content: &str, edited_at: Timestamp) {
        self.content = content.to_string();
        self.tags = tags::derive_tags(content);
        self.edited_at = Some(edited_at);
    }

    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or(&[])
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|candidate| candidate == tag)
    }

    pub fn is_pinned(&self) -> bool {
        self.is_pinned.unwrap_or(false)
    }

    pub fn is_bookmarked(&self) -> bool {
        self.is_bookmarked.unwrap_or(false)
    }

    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }
}

fn default_icon(name: &str) -> Option<String> {
    name.trim()
        .chars()
        .next()
        .map(|first| first.to_uppercase().collect())
}

/// Renders epoch milliseconds with `format`, falling back to the raw number.
pub fn format_timestamp(millis: Timestamp, format: Option<&[FormatItem<'_>]>) -> String {
    format
        .and_then(|items| {
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
                .ok()?
                .format(items)
                .ok()
        })
        .unwrap_or_else(|| millis.to_string())
}

/// Lowercases a channel name and joins whitespace runs with `-`.
pub fn normalize_channel_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}
