use std::sync::Arc;

use indexmap::IndexMap;

use crate::model::{Channel, Clock, Message, Server};
use crate::storage::snapshot::{new_id, SCHEMA_VERSION};
use crate::storage::{ImportError, Snapshot, StorageError, StorageHandle};
use crate::tags::normalize_token;

pub mod views;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub server: Option<String>,
    pub channel: Option<String>,
    /// Lowercased tag filter applied to the current channel view.
    pub tag: Option<String>,
}

/// Everything removed by a cascading delete, root included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub servers: Vec<String>,
    pub channels: Vec<String>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ServerAdded(String),
    ServerUpdated(String),
    ServerDeleted(CascadeReport),
    ChannelAdded(String),
    ChannelUpdated(String),
    ChannelDeleted(CascadeReport),
    MessageAdded(String),
    MessageUpdated(String),
    MessageDeleted(String),
    PinToggled { id: String, pinned: bool },
    BookmarkToggled { id: String, bookmarked: bool },
    SelectionChanged(Selection),
    Replaced,
    PersistFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&StoreEvent) + Send>;

pub struct EntityStore {
    servers: IndexMap<String, Server>,
    channels: IndexMap<String, Channel>,
    messages: IndexMap<String, Message>,
    selection: Selection,
    storage: StorageHandle,
    clock: Arc<dyn Clock>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
    version: u32,
}

impl EntityStore {
    /// Loads the persisted snapshot (seeding on first run) and selects the
    /// first server.
    pub fn open(storage: StorageHandle, clock: Arc<dyn Clock>) -> Self {
        let snapshot = storage.load();
        Self::from_snapshot(snapshot, storage, clock)
    }

    pub fn from_snapshot(
        snapshot: Snapshot,
        storage: StorageHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut store = Self {
            servers: IndexMap::new(),
            channels: IndexMap::new(),
            messages: IndexMap::new(),
            selection: Selection::default(),
            storage,
            clock,
            listeners: Vec::new(),
            next_subscription: 0,
            version: SCHEMA_VERSION,
        };
        store.install(snapshot);
        store
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> + '_ {
        self.servers.values()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> + '_ {
        self.channels.values()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.messages.values()
    }

    pub fn server(&self, id: &str) -> Option<&Server> {
        self.servers.get(id)
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn channels_for_server<'a>(
        &'a self,
        server_id: &'a str,
    ) -> impl Iterator<Item = &'a Channel> + 'a {
        self.channels
            .values()
            .filter(move |channel| channel.server_id == server_id)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn add_server(&mut self, name: &str, icon: Option<&str>) -> Server {
        let server = Server::new(new_id(), name, icon, self.clock.now());
        self.servers.insert(server.id.clone(), server.clone());
        self.commit(StoreEvent::ServerAdded(server.id.clone()));
        server
    }

    pub fn update_server(&mut self, id: &str, name: &str, icon: Option<&str>) -> bool {
        let Some(server) = self.servers.get_mut(id) else {
            return false;
        };
        server.name = name.to_string();
        if let Some(icon) = icon {
            server.icon = Some(icon.to_string());
        }
        self.commit(StoreEvent::ServerUpdated(id.to_string()));
        true
    }

    pub fn delete_server(&mut self, id: &str) -> Option<CascadeReport> {
        self.servers.shift_remove(id)?;
        let channel_ids: Vec<String> = self
            .channels
            .values()
            .filter(|channel| channel.server_id == id)
            .map(|channel| channel.id.clone())
            .collect();
        let mut report = self.remove_channels(&channel_ids);
        report.servers.push(id.to_string());

        if self.selection.server.as_deref() == Some(id) {
            self.selection.server = None;
            self.selection.channel = None;
        }
        tracing::debug!(
            server = id,
            channels = report.channels.len(),
            messages = report.messages.len(),
            "server deleted"
        );
        self.commit(StoreEvent::ServerDeleted(report.clone()));
        Some(report)
    }

    pub fn add_channel(&mut self, server_id: &str, name: &str) -> Channel {
        let channel = Channel {
            id: new_id(),
            server_id: server_id.to_string(),
            name: name.to_string(),
            created_at: self.clock.now(),
        };
        self.channels.insert(channel.id.clone(), channel.clone());
        self.commit(StoreEvent::ChannelAdded(channel.id.clone()));
        channel
    }

    pub fn update_channel(&mut self, id: &str, name: &str) -> bool {
        let Some(channel) = self.channels.get_mut(id) else {
            return false;
        };
        channel.name = name.to_string();
        self.commit(StoreEvent::ChannelUpdated(id.to_string()));
        true
    }

    pub fn delete_channel(&mut self, id: &str) -> Option<CascadeReport> {
        if !self.channels.contains_key(id) {
            return None;
        }
        let report = self.remove_channels(&[id.to_string()]);
        tracing::debug!(
            channel = id,
            messages = report.messages.len(),
            "channel deleted"
        );
        self.commit(StoreEvent::ChannelDeleted(report.clone()));
        Some(report)
    }

    pub fn add_message(&mut self, channel_id: &str, content: &str) -> Message {
        let message = Message::new(new_id(), channel_id, content, self.clock.now());
        self.messages.insert(message.id.clone(), message.clone());
        self.commit(StoreEvent::MessageAdded(message.id.clone()));
        message
    }

    pub fn update_message(&mut self, id: &str, content: &str) -> bool {
        let now = self.clock.now();
        let Some(message) = self.messages.get_mut(id) else {
            return false;
        };
        message.set_content(content, now);
        self.commit(StoreEvent::MessageUpdated(id.to_string()));
        true
    }

    pub fn delete_message(&mut self, id: &str) -> bool {
        if self.messages.shift_remove(id).is_none() {
            return false;
        }
        self.commit(StoreEvent::MessageDeleted(id.to_string()));
        true
    }

    pub fn toggle_pin(&mut self, id: &str) -> Option<bool> {
        let message = self.messages.get_mut(id)?;
        let pinned = !message.is_pinned();
        message.is_pinned = Some(pinned);
        self.commit(StoreEvent::PinToggled {
            id: id.to_string(),
            pinned,
        });
        Some(pinned)
    }

    pub fn toggle_bookmark(&mut self, id: &str) -> Option<bool> {
        let message = self.messages.get_mut(id)?;
        let bookmarked = !message.is_bookmarked();
        message.is_bookmarked = Some(bookmarked);
        self.commit(StoreEvent::BookmarkToggled {
            id: id.to_string(),
            bookmarked,
        });
        Some(bookmarked)
    }

    /// Selects a server and its first channel. Unknown ids clear the selection.
    pub fn select_server(&mut self, id: Option<&str>) {
        let server = id.filter(|id| self.servers.contains_key(*id));
        self.selection.server = server.map(str::to_string);
        self.selection.channel = server.and_then(|server_id| {
            self.channels_for_server(server_id)
                .next()
                .map(|channel| channel.id.clone())
        });
        self.announce_selection();
    }

    pub fn select_channel(&mut self, id: Option<&str>) {
        self.selection.channel = id.map(str::to_string);
        self.announce_selection();
    }

    pub fn select_tag(&mut self, tag: Option<&str>) {
        self.selection.tag = tag
            .map(normalize_token)
            .filter(|tag| !tag.is_empty());
        self.announce_selection();
    }

    /// Swaps in a whole snapshot (after import or reset). Already persisted by
    /// the caller, so nothing is written here.
    pub fn replace_snapshot(&mut self, snapshot: Snapshot) {
        self.install(snapshot);
        self.emit(&StoreEvent::Replaced);
    }

    pub fn import_json(&mut self, raw: &str) -> Result<(), ImportError> {
        let snapshot = self.storage.import(raw)?;
        self.replace_snapshot(snapshot);
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), StorageError> {
        let snapshot = self.storage.reset()?;
        self.replace_snapshot(snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            servers: self.servers.values().cloned().collect(),
            channels: self.channels.values().cloned().collect(),
            messages: self.messages.values().cloned().collect(),
            version: self.version,
        }
    }

    fn install(&mut self, mut snapshot: Snapshot) {
        // a newer schema's stamp survives later saves
        self.version = snapshot.version.max(SCHEMA_VERSION);
        snapshot.rederive_tags();
        self.servers = snapshot
            .servers
            .into_iter()
            .map(|server| (server.id.clone(), server))
            .collect();
        self.channels = snapshot
            .channels
            .into_iter()
            .map(|channel| (channel.id.clone(), channel))
            .collect();
        self.messages = snapshot
            .messages
            .into_iter()
            .map(|message| (message.id.clone(), message))
            .collect();
        self.selection = Selection::default();
        let first = self.servers.keys().next().cloned();
        self.select_server(first.as_deref());
    }

    fn remove_channels(&mut self, channel_ids: &[String]) -> CascadeReport {
        let mut report = CascadeReport::default();
        for channel_id in channel_ids {
            if self.channels.shift_remove(channel_id).is_some() {
                report.channels.push(channel_id.clone());
            }
        }
        self.messages.retain(|id, message| {
            if channel_ids.contains(&message.channel_id) {
                report.messages.push(id.clone());
                false
            } else {
                true
            }
        });
        if self
            .selection
            .channel
            .as_ref()
            .is_some_and(|selected| channel_ids.contains(selected))
        {
            self.selection.channel = None;
        }
        report
    }

    fn announce_selection(&mut self) {
        let selection = self.selection.clone();
        self.emit(&StoreEvent::SelectionChanged(selection));
    }

    fn commit(&mut self, event: StoreEvent) {
        self.emit(&event);
        self.persist();
    }

    fn persist(&mut self) {
        if let Err(err) = self.storage.save(&self.snapshot()) {
            tracing::warn!(?err, "failed to persist snapshot");
            self.emit(&StoreEvent::PersistFailed(err.to_string()));
        }
    }

    fn emit(&mut self, event: &StoreEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{empty_store, failing_store, ManualClock};
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    fn recorder(store: &mut EntityStore) -> Arc<Mutex<Vec<StoreEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        store.subscribe(move |event| sink.lock().push(event.clone()));
        events
    }

    #[test]
    fn server_cascade_removes_channels_and_messages() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("Work", None);
        let other = store.add_server("Home", None);
        let a = store.add_channel(&server.id, "a");
        let b = store.add_channel(&server.id, "b");
        let kept = store.add_channel(&other.id, "kept");
        store.add_message(&a.id, "one");
        store.add_message(&a.id, "two");
        store.add_message(&b.id, "three");
        let survivor = store.add_message(&kept.id, "four");

        store.select_server(Some(&server.id));
        store.select_channel(Some(&b.id));

        let report = store.delete_server(&server.id).expect("known server");
        assert_eq!(report.servers, vec![server.id.clone()]);
        assert_eq!(report.channels.len(), 2);
        assert_eq!(report.messages.len(), 3);

        assert_eq!(store.servers().count(), 1);
        assert_eq!(store.channels().count(), 1);
        let remaining: Vec<_> = store.messages().map(|m| m.id.clone()).collect();
        assert_eq!(remaining, vec![survivor.id]);
        assert_eq!(store.selection().server, None);
        assert_eq!(store.selection().channel, None);
    }

    #[test]
    fn channel_delete_clears_selected_channel_only() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("Work", None);
        let first = store.add_channel(&server.id, "first");
        let second = store.add_channel(&server.id, "second");
        store.add_message(&second.id, "bye");
        store.select_server(Some(&server.id));
        assert_eq!(store.selection().channel.as_deref(), Some(first.id.as_str()));

        store.select_channel(Some(&second.id));
        let report = store.delete_channel(&second.id).expect("known channel");
        assert_eq!(report.messages.len(), 1);
        assert_eq!(store.selection().server.as_deref(), Some(server.id.as_str()));
        assert_eq!(store.selection().channel, None);
        assert!(store.delete_channel(&second.id).is_none());
    }

    #[test]
    fn edit_with_same_content_stamps_edited_at() {
        let (mut store, clock) = empty_store();
        let message = store.add_message("c1", "#a hello");
        clock.set(500);
        assert!(store.update_message(&message.id, "#a hello"));

        let edited = store.message(&message.id).expect("message");
        assert_eq!(edited.tags(), ["a"]);
        assert_eq!(edited.edited_at, Some(500));
        assert_eq!(edited.created_at, message.created_at);
    }

    #[test]
    fn edit_keeps_flags_and_rederives_tags() {
        let (mut store, _clock) = empty_store();
        let message = store.add_message("c1", "#old");
        assert_eq!(store.toggle_pin(&message.id), Some(true));
        assert_eq!(store.toggle_bookmark(&message.id), Some(true));
        assert_eq!(store.message(&message.id).expect("message").edited_at, None);

        store.update_message(&message.id, "#New #new #other");
        let edited = store.message(&message.id).expect("message");
        assert_eq!(edited.tags(), ["new", "other"]);
        assert!(edited.is_pinned());
        assert!(edited.is_bookmarked());

        assert_eq!(store.toggle_pin(&message.id), Some(false));
        assert_eq!(
            store.message(&message.id).expect("message").is_pinned,
            Some(false)
        );
    }

    #[test]
    fn unknown_ids_are_silent_noops() {
        let (mut store, _clock) = empty_store();
        let events = recorder(&mut store);
        assert!(!store.update_server("nope", "x", None));
        assert!(store.delete_server("nope").is_none());
        assert!(!store.update_channel("nope", "x"));
        assert!(!store.update_message("nope", "x"));
        assert!(!store.delete_message("nope"));
        assert_eq!(store.toggle_pin("nope"), None);
        assert_eq!(store.toggle_bookmark("nope"), None);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn select_server_picks_first_channel_or_none() {
        let (mut store, _clock) = empty_store();
        let empty = store.add_server("Empty", None);
        let busy = store.add_server("Busy", None);
        let first = store.add_channel(&busy.id, "first");
        store.add_channel(&busy.id, "second");

        store.select_server(Some(&busy.id));
        assert_eq!(store.selection().channel.as_deref(), Some(first.id.as_str()));

        store.select_server(Some(&empty.id));
        assert_eq!(store.selection().server.as_deref(), Some(empty.id.as_str()));
        assert_eq!(store.selection().channel, None);

        store.select_server(Some("unknown"));
        assert_eq!(store.selection(), &Selection::default());
    }

    #[test]
    fn tag_selection_is_normalized_and_independent() {
        let (mut store, _clock) = empty_store();
        store.select_tag(Some("#Work"));
        assert_eq!(store.selection().tag.as_deref(), Some("work"));
        store.select_channel(Some("anything"));
        assert_eq!(store.selection().tag.as_deref(), Some("work"));
        store.select_tag(None);
        assert_eq!(store.selection().tag, None);
    }

    #[test]
    fn server_icon_update_only_when_given() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("alpha", None);
        store.update_server(&server.id, "beta", None);
        let renamed = store.server(&server.id).expect("server");
        assert_eq!(renamed.name, "beta");
        assert_eq!(renamed.icon.as_deref(), Some("A"));

        store.update_server(&server.id, "beta", Some("★"));
        assert_eq!(
            store.server(&server.id).expect("server").icon.as_deref(),
            Some("★")
        );
    }

    #[test]
    fn mutations_persist_through_storage() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("Saved", None);
        let stored = store.storage().load();
        assert_eq!(stored.servers.len(), 1);
        assert_eq!(stored.servers[0].id, server.id);
    }

    #[test]
    fn open_loads_seed_and_selects_first_server() {
        let (store, _clock) = empty_store();
        let reopened = EntityStore::open(store.storage().clone(), Arc::new(ManualClock::new(0)));
        assert_eq!(reopened.servers().count(), 0);

        let (seeded, _clock) = testing::seeded_store();
        let server = seeded.servers().next().expect("seeded server");
        let channel = seeded.channels().next().expect("seeded channel");
        assert_eq!(seeded.selection().server.as_deref(), Some(server.id.as_str()));
        assert_eq!(seeded.selection().channel.as_deref(), Some(channel.id.as_str()));
    }

    #[test]
    fn persist_failure_is_broadcast_not_raised() {
        let mut store = failing_store();
        let events = recorder(&mut store);
        let server = store.add_server("Kept", None);

        assert!(store.server(&server.id).is_some());
        let events = events.lock();
        assert_matches!(
            events.as_slice(),
            [StoreEvent::ServerAdded(_), StoreEvent::PersistFailed(_)]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let (mut store, _clock) = empty_store();
        let events = Arc::new(Mutex::new(0usize));
        let sink = events.clone();
        let id = store.subscribe(move |_| *sink.lock() += 1);
        store.add_server("one", None);
        assert!(store.unsubscribe(id));
        store.add_server("two", None);
        assert_eq!(*events.lock(), 1);
        assert!(!store.unsubscribe(id));
    }

    #[test]
    fn import_replaces_state_and_reselects() -> anyhow::Result<()> {
        let (mut store, _clock) = empty_store();
        store.add_server("Before", None);
        store.select_tag(Some("x"));

        let raw = r#"{
            "servers": [{"id": "s1", "name": "Imported", "createdAt": 1}],
            "channels": [{"id": "c1", "serverId": "s1", "name": "general", "createdAt": 1}],
            "messages": []
        }"#;
        store.import_json(raw)?;
        assert_eq!(store.servers().map(|s| s.name.as_str()).collect::<Vec<_>>(), ["Imported"]);
        assert_eq!(store.selection().server.as_deref(), Some("s1"));
        assert_eq!(store.selection().channel.as_deref(), Some("c1"));
        assert_eq!(store.selection().tag, None);

        assert!(store.import_json("{}").is_err());
        assert_eq!(store.servers().count(), 1);
        Ok(())
    }

    #[test]
    fn import_rederives_tags_from_content() -> anyhow::Result<()> {
        let (mut store, _clock) = empty_store();
        let raw = r##"{
            "servers": [{"id": "s1", "name": "S", "createdAt": 1}],
            "channels": [{"id": "c1", "serverId": "s1", "name": "general", "createdAt": 1}],
            "messages": [
                {"id": "m1", "channelId": "c1", "content": "#real text", "createdAt": 2,
                 "tags": ["Bogus"]},
                {"id": "m2", "channelId": "c1", "content": "untagged", "createdAt": 3,
                 "tags": ["stale"]}
            ]
        }"##;
        store.import_json(raw)?;

        let tags_of = |id: &str| store.message(id).and_then(|m| m.tags.clone());
        assert_eq!(tags_of("m1"), Some(vec!["real".to_string()]));
        assert_eq!(tags_of("m2"), None);
        assert_eq!(
            views::tag_stats(&store),
            [views::TagCount {
                tag: "real".into(),
                count: 1
            }]
        );
        assert_eq!(views::channel_messages(&store, "c1", Some("real")).len(), 1);
        assert_eq!(store.storage().load().messages, store.snapshot().messages);
        Ok(())
    }

    #[test]
    fn newer_schema_version_survives_mutation() -> anyhow::Result<()> {
        let (mut store, _clock) = empty_store();
        store.import_json(r#"{"servers": [], "channels": [], "messages": [], "version": 7}"#)?;
        store.add_server("After", None);

        assert_eq!(store.snapshot().version, 7);
        assert_eq!(store.storage().load().version, 7);
        Ok(())
    }

    #[test]
    fn snapshot_round_trips_through_from_snapshot() {
        let (mut store, _clock) = empty_store();
        let server = store.add_server("S", Some("s"));
        let channel = store.add_channel(&server.id, "c");
        store.add_message(&channel.id, "#t body");
        let snapshot = store.snapshot();

        let rebuilt = EntityStore::from_snapshot(
            snapshot.clone(),
            store.storage().clone(),
            Arc::new(ManualClock::new(0)),
        );
        assert_eq!(rebuilt.snapshot(), snapshot);
    }
}
