use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ImportError;
use crate::model::{Channel, Message, Server, Timestamp};
use crate::tags;

pub const SCHEMA_VERSION: u32 = 1;

const COLLECTIONS: [&str; 3] = ["servers", "channels", "messages"];

const WELCOME_SERVER: &str = "My Space";
const WELCOME_CHANNEL: &str = "general";
const WELCOME_MESSAGE: &str =
    "Welcome to notecord! Tag anything with #welcome or nest topics like #guide/start.";

/// Full persisted state. Both the storage payload and the backup file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub servers: Vec<Server>,
    pub channels: Vec<Channel>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub version: u32,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
            channels: Vec::new(),
            messages: Vec::new(),
            version: SCHEMA_VERSION,
        }
    }

    /// First-run state: one server, one channel and a welcome message.
    pub fn seeded(now: Timestamp) -> Self {
        let server = Server::new(new_id(), WELCOME_SERVER, None, now);
        let channel = Channel {
            id: new_id(),
            server_id: server.id.clone(),
            name: WELCOME_CHANNEL.to_string(),
            created_at: now,
        };
        let message = Message::new(new_id(), &channel.id, WELCOME_MESSAGE, now);
        Self {
            servers: vec![server],
            channels: vec![channel],
            messages: vec![message],
            version: SCHEMA_VERSION,
        }
    }

    /// Parses a payload, requiring the three entity collections to be present.
    ///
    /// Foreign keys are not cross-checked; orphans are tolerated and skipped
    /// by the read views.
    pub fn from_json(raw: &str) -> Result<Self, ImportError> {
        let value: Value = serde_json::from_str(raw).map_err(ImportError::Parse)?;
        let Some(object) = value.as_object() else {
            return Err(ImportError::NotAnObject);
        };
        for name in COLLECTIONS {
            if !object.get(name).is_some_and(Value::is_array) {
                return Err(ImportError::MissingCollection(name));
            }
        }
        let mut snapshot: Self =
            serde_json::from_value(value).map_err(ImportError::InvalidEntries)?;
        snapshot.rederive_tags();
        Ok(snapshot)
    }

    /// Recomputes every message's tags from its content, discarding whatever
    /// the payload carried.
    pub fn rederive_tags(&mut self) {
        for message in &mut self.messages {
            message.tags = tags::derive_tags(&message.content);
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Brings an older snapshot up to [`SCHEMA_VERSION`]. Returns `true` when the
/// snapshot changed and should be written back.
pub fn migrate(snapshot: &mut Snapshot) -> bool {
    if snapshot.version >= SCHEMA_VERSION {
        if snapshot.version > SCHEMA_VERSION {
            tracing::warn!(
                version = snapshot.version,
                current = SCHEMA_VERSION,
                "snapshot written by a newer schema; loading as-is"
            );
        }
        return false;
    }
    // No structural changes between versions yet; only the stamp moves.
    snapshot.version = SCHEMA_VERSION;
    true
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
