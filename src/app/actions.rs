use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::app::state::{ConfirmTarget, InputPurpose};
use crate::config::AppConfig;
use crate::model::normalize_channel_name;
use crate::store::EntityStore;

/// Applies validated UI requests to the store and reports a status line.
pub struct ActionDispatcher<'a> {
    store: &'a mut EntityStore,
    config: &'a AppConfig,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(store: &'a mut EntityStore, config: &'a AppConfig) -> Self {
        Self { store, config }
    }

    pub fn submit_input(&mut self, purpose: &InputPurpose, text: &str) -> Result<String> {
        let text = text.trim();
        match purpose {
            InputPurpose::NewServer => {
                let name = require(text, "Server name")?;
                let server = self.store.add_server(name, None);
                self.store.select_server(Some(&server.id));
                Ok(format!("Created server {}", server.name))
            }
            InputPurpose::RenameServer { id } => {
                let name = require(text, "Server name")?;
                if !self.store.update_server(id, name, None) {
                    bail!("Server no longer exists");
                }
                Ok(format!("Renamed server to {name}"))
            }
            InputPurpose::NewChannel { server_id } => {
                let name = self.channel_name(text)?;
                let channel = self.store.add_channel(server_id, &name);
                self.store.select_channel(Some(&channel.id));
                self.store.select_tag(None);
                Ok(format!("Created channel #{name}"))
            }
            InputPurpose::RenameChannel { id } => {
                let name = self.channel_name(text)?;
                if !self.store.update_channel(id, &name) {
                    bail!("Channel no longer exists");
                }
                Ok(format!("Renamed channel to #{name}"))
            }
            InputPurpose::ComposeMessage { channel_id } => {
                let content = require(text, "Message")?;
                let message = self.store.add_message(channel_id, content);
                Ok(match message.tags() {
                    [] => "Message posted".to_string(),
                    tags => format!("Message posted with {} tag(s)", tags.len()),
                })
            }
            InputPurpose::EditMessage { id } => {
                let content = require(text, "Message")?;
                if !self.store.update_message(id, content) {
                    bail!("Message no longer exists");
                }
                Ok("Message updated".to_string())
            }
            InputPurpose::ImportPath => {
                let path = require(text, "Import path")?;
                self.import_file(&expand_home(path))
            }
        }
    }

    pub fn confirm_delete(&mut self, target: &ConfirmTarget) -> Result<String> {
        match target {
            ConfirmTarget::Server { id, name } => match self.store.delete_server(id) {
                Some(report) => Ok(format!(
                    "Deleted server {name} ({} channels, {} messages)",
                    report.channels.len(),
                    report.messages.len()
                )),
                None => bail!("Server no longer exists"),
            },
            ConfirmTarget::Channel { id, name } => match self.store.delete_channel(id) {
                Some(report) => Ok(format!(
                    "Deleted #{name} ({} messages)",
                    report.messages.len()
                )),
                None => bail!("Channel no longer exists"),
            },
            ConfirmTarget::Message { id, .. } => {
                if !self.store.delete_message(id) {
                    bail!("Message no longer exists");
                }
                Ok("Message deleted".to_string())
            }
            ConfirmTarget::Reset => {
                self.store.reset().context("resetting data")?;
                Ok("All data cleared".to_string())
            }
        }
    }

    pub fn toggle_pin(&mut self, id: &str) -> Result<String> {
        match self.store.toggle_pin(id) {
            Some(true) => Ok("Message pinned".to_string()),
            Some(false) => Ok("Message unpinned".to_string()),
            None => bail!("Message no longer exists"),
        }
    }

    pub fn toggle_bookmark(&mut self, id: &str) -> Result<String> {
        match self.store.toggle_bookmark(id) {
            Some(true) => Ok("Bookmarked".to_string()),
            Some(false) => Ok("Bookmark removed".to_string()),
            None => bail!("Message no longer exists"),
        }
    }

    pub fn export(&self) -> Result<String> {
        let path = self
            .store
            .storage()
            .export_to(None)
            .context("exporting backup")?;
        Ok(format!("Exported to {}", path.display()))
    }

    pub fn import_file(&mut self, path: &Path) -> Result<String> {
        let snapshot = self
            .store
            .storage()
            .import_file(path)
            .with_context(|| format!("Import of {} failed", path.display()))?;
        let messages = snapshot.messages.len();
        self.store.replace_snapshot(snapshot);
        Ok(format!("Imported {messages} messages from {}", path.display()))
    }

    fn channel_name(&self, text: &str) -> Result<String> {
        let name = require(text, "Channel name")?;
        if self.config.display.normalize_channel_names {
            Ok(normalize_channel_name(name))
        } else {
            Ok(name.to_string())
        }
    }
}

fn require<'t>(text: &'t str, what: &str) -> Result<&'t str> {
    if text.is_empty() {
        bail!("{what} cannot be empty");
    }
    Ok(text)
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(raw)
}
