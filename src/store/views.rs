//! Read-only projections over an [`EntityStore`]. Every call is a fresh scan.

use indexmap::IndexMap;

use super::EntityStore;
use crate::model::{Channel, Message, Server};
use crate::search::SearchQuery;

/// A message resolved to the channel and server it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageContext<'a> {
    pub message: &'a Message,
    pub channel: &'a Channel,
    pub server: &'a Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Messages in `channel_id`, oldest first, optionally restricted to `tag`.
pub fn channel_messages<'a>(
    store: &'a EntityStore,
    channel_id: &str,
    tag: Option<&str>,
) -> Vec<&'a Message> {
    let mut messages: Vec<&Message> = store
        .messages()
        .filter(|message| message.channel_id == channel_id)
        .filter(|message| tag.map_or(true, |tag| message.has_tag(tag)))
        .collect();
    messages.sort_by_key(|message| message.created_at);
    messages
}

pub fn current_channel_messages(store: &EntityStore) -> Vec<&Message> {
    let selection = store.selection();
    match selection.channel.as_deref() {
        Some(channel_id) => channel_messages(store, channel_id, selection.tag.as_deref()),
        None => Vec::new(),
    }
}

pub fn pinned_messages<'a>(store: &'a EntityStore, channel_id: &str) -> Vec<&'a Message> {
    let mut messages: Vec<&Message> = store
        .messages()
        .filter(|message| message.channel_id == channel_id && message.is_pinned())
        .collect();
    messages.sort_by_key(|message| message.created_at);
    messages
}

pub fn current_pinned_messages(store: &EntityStore) -> Vec<&Message> {
    match store.selection().channel.as_deref() {
        Some(channel_id) => pinned_messages(store, channel_id),
        None => Vec::new(),
    }
}

/// Bookmarks across every channel, newest first.
pub fn bookmarked_messages(store: &EntityStore) -> Vec<MessageContext<'_>> {
    let mut found: Vec<MessageContext<'_>> = store
        .messages()
        .filter(|message| message.is_bookmarked())
        .filter_map(|message| resolve(store, message))
        .collect();
    sort_newest_first(&mut found);
    found
}

/// Tag usage counts, most used first. Ties keep first-seen order.
pub fn tag_stats(store: &EntityStore) -> Vec<TagCount> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for message in store.messages() {
        if resolve(store, message).is_none() {
            continue;
        }
        for tag in message.tags() {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let mut stats: Vec<TagCount> = counts
        .into_iter()
        .map(|(tag, count)| TagCount {
            tag: tag.to_string(),
            count,
        })
        .collect();
    stats.sort_by(|a, b| b.count.cmp(&a.count));
    stats
}

/// Full-text search over message content, newest first.
pub fn search<'a>(store: &'a EntityStore, query: &str) -> Vec<MessageContext<'a>> {
    let query = SearchQuery::new(query);
    if query.is_empty() {
        return Vec::new();
    }
    let mut found: Vec<MessageContext<'_>> = store
        .messages()
        .filter(|message| query.matches(&message.content))
        .filter_map(|message| resolve(store, message))
        .collect();
    sort_newest_first(&mut found);
    found
}

pub fn resolve<'a>(store: &'a EntityStore, message: &'a Message) -> Option<MessageContext<'a>> {
    let channel = store.channel(&message.channel_id)?;
    let server = store.server(&channel.server_id)?;
    Some(MessageContext {
        message,
        channel,
        server,
    })
}

fn sort_newest_first(found: &mut [MessageContext<'_>]) {
    found.sort_by(|a, b| b.message.created_at.cmp(&a.message.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::empty_store;

    fn contents(messages: &[&Message]) -> Vec<String> {
        messages.iter().map(|m| m.content.clone()).collect()
    }

    #[test]
    fn channel_view_ascends_and_bookmarks_descend() {
        let (mut store, clock) = empty_store();
        let server = store.add_server("S", None);
        let channel = store.add_channel(&server.id, "general");
        for (at, content) in [(3, "three"), (1, "one"), (2, "two")] {
            clock.set(at);
            let message = store.add_message(&channel.id, content);
            store.toggle_bookmark(&message.id);
        }
        store.select_server(Some(&server.id));

        assert_eq!(
            contents(&current_channel_messages(&store)),
            ["one", "two", "three"]
        );
        let bookmarks: Vec<_> = bookmarked_messages(&store)
            .iter()
            .map(|ctx| ctx.message.created_at)
            .collect();
        assert_eq!(bookmarks, [3, 2, 1]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let (mut store, _clock) = empty_store();
        for content in ["a", "b", "c"] {
            store.add_message("c1", content);
        }
        assert_eq!(contents(&channel_messages(&store, "c1", None)), ["a", "b", "c"]);
    }

    #[test]
    fn tag_filter_excludes_untagged_messages() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("S", None);
        let channel = store.add_channel(&server.id, "general");
        store.add_message(&channel.id, "#x hi");
        store.add_message(&channel.id, "no tag");
        store.add_message(&channel.id, "#x #y");
        store.select_server(Some(&server.id));
        store.select_tag(Some("x"));

        assert_eq!(contents(&current_channel_messages(&store)), ["#x hi", "#x #y"]);

        store.select_channel(None);
        assert!(current_channel_messages(&store).is_empty());
    }

    #[test]
    fn pinned_view_is_scoped_to_channel() {
        let (mut store, clock) = empty_store();
        let server = store.add_server("S", None);
        let here = store.add_channel(&server.id, "here");
        let there = store.add_channel(&server.id, "there");
        clock.set(2);
        let late = store.add_message(&here.id, "late");
        clock.set(1);
        let early = store.add_message(&here.id, "early");
        let elsewhere = store.add_message(&there.id, "elsewhere");
        store.add_message(&here.id, "unpinned");
        for id in [&late.id, &early.id, &elsewhere.id] {
            store.toggle_pin(id);
        }
        store.select_server(Some(&server.id));

        assert_eq!(contents(&current_pinned_messages(&store)), ["early", "late"]);
        assert_eq!(contents(&pinned_messages(&store, &there.id)), ["elsewhere"]);
    }

    #[test]
    fn search_is_case_insensitive_and_skips_orphans() {
        let (mut store, clock) = empty_store();
        let server = store.add_server("S", None);
        let channel = store.add_channel(&server.id, "general");
        store.add_message(&channel.id, "hi there");
        clock.set(10);
        store.add_message(&channel.id, "HI again");
        store.add_message("missing-channel", "hi orphan");
        store.add_message(&channel.id, "bye");

        let found: Vec<_> = search(&store, "  Hi ")
            .iter()
            .map(|ctx| ctx.message.content.clone())
            .collect();
        assert_eq!(found, ["HI again", "hi there"]);
        assert!(search(&store, "").is_empty());
        assert!(search(&store, "   ").is_empty());

        let first = search(&store, "there");
        assert_eq!(first[0].channel.name, "general");
        assert_eq!(first[0].server.name, "S");
    }

    #[test]
    fn tag_stats_count_distinct_tags_per_message() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("S", None);
        let channel = store.add_channel(&server.id, "general");
        store.add_message(&channel.id, "#b #a #b");
        store.add_message(&channel.id, "#a");
        store.add_message(&channel.id, "#c");
        store.add_message("orphan", "#a #zzz");

        let stats = tag_stats(&store);
        assert_eq!(
            stats,
            vec![
                TagCount { tag: "a".into(), count: 2 },
                TagCount { tag: "b".into(), count: 1 },
                TagCount { tag: "c".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn scenario_tag_stats_follow_channel_lifecycle() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("Test", None);
        let channel = store.add_channel(&server.id, "general");
        store.add_message(&channel.id, "#foo bar");

        assert_eq!(
            tag_stats(&store),
            vec![TagCount { tag: "foo".into(), count: 1 }]
        );

        store.delete_channel(&channel.id);
        assert!(tag_stats(&store).is_empty());
    }

    #[test]
    fn bookmarks_skip_messages_whose_server_is_gone() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("S", None);
        let channel = store.add_channel(&server.id, "general");
        let message = store.add_message(&channel.id, "keep");
        store.toggle_bookmark(&message.id);
        assert_eq!(bookmarked_messages(&store).len(), 1);

        let snapshot = {
            let mut snapshot = store.snapshot();
            snapshot.servers.clear();
            snapshot
        };
        store.replace_snapshot(snapshot);
        assert!(bookmarked_messages(&store).is_empty());
    }
}
