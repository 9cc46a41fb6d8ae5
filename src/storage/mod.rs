use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::config::{ConfigPaths, StorageOptions};
use crate::model::{Clock, SystemClock};

mod schema;
pub mod snapshot;

pub use snapshot::{Snapshot, SCHEMA_VERSION};

const EXPORT_PREFIX: &str = "notecord-backup";
const EXPORT_EXTENSION: &str = "json";
const EXPORT_TMP_EXTENSION: &str = "json.tmp";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Slot(#[from] anyhow::Error),
    #[error("serializing snapshot")]
    Serialize(#[from] serde_json::Error),
    #[error("writing export {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("reading import file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("import is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("import must be a JSON object with servers, channels and messages")]
    NotAnObject,
    #[error("import is missing the `{0}` collection")]
    MissingCollection(&'static str),
    #[error("import contains malformed entries: {0}")]
    InvalidEntries(#[source] serde_json::Error),
    #[error("storing imported data failed")]
    Storage(#[from] StorageError),
}

/// Single-key blob store the snapshot is persisted into.
pub trait KeyValueSlot: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Writes `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

pub struct SqliteSlot {
    conn: Mutex<Connection>,
}

impl SqliteSlot {
    pub fn open(db_path: &Path, options: &StorageOptions) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        prepare_connection(&conn, options)?;
        schema::apply(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueSlot for SqliteSlot {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get::<_, String>(0)
        })
        .optional()
        .with_context(|| format!("reading slot '{key}'"))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            params![key, value, now],
        )
        .with_context(|| format!("writing slot '{key}'"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub contents: String,
}

#[derive(Clone)]
pub struct StorageHandle {
    slot: Arc<dyn KeyValueSlot>,
    key: Arc<str>,
    backup_dir: Arc<PathBuf>,
}

impl StorageHandle {
    pub fn new(slot: Arc<dyn KeyValueSlot>, key: &str, backup_dir: PathBuf) -> Self {
        Self {
            slot,
            key: Arc::from(key),
            backup_dir: Arc::new(backup_dir),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Returns the stored snapshot, falling back to a freshly seeded (and
    /// persisted) one when nothing usable is stored.
    pub fn load(&self) -> Snapshot {
        match self.read_stored() {
            Ok(Some(mut snapshot)) => {
                if snapshot::migrate(&mut snapshot) {
                    tracing::info!(version = SCHEMA_VERSION, "restamping stored snapshot");
                    if let Err(err) = self.save(&snapshot) {
                        tracing::warn!(?err, "failed to store restamped snapshot");
                    }
                }
                snapshot
            }
            Ok(None) => {
                tracing::info!("no stored data, seeding first-run snapshot");
                self.seed()
            }
            Err(err) => {
                tracing::warn!(?err, "stored data unreadable, seeding first-run snapshot");
                self.seed()
            }
        }
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let json = snapshot.to_json()?;
        self.slot.set(&self.key, &json)?;
        Ok(())
    }

    pub fn export(&self) -> Result<ExportArtifact, StorageError> {
        let snapshot = self.load();
        let contents = snapshot.to_json_pretty()?;
        Ok(ExportArtifact {
            file_name: export_file_name(OffsetDateTime::now_utc()),
            contents,
        })
    }

    /// Writes an export to `target` (a directory or a `.json` path), or into
    /// the backup directory when no target is given.
    pub fn export_to(&self, target: Option<&Path>) -> Result<PathBuf, StorageError> {
        let artifact = self.export()?;
        let path = match target {
            Some(path) if path.extension().is_some() && !path.is_dir() => path.to_path_buf(),
            Some(dir) => dir.join(&artifact.file_name),
            None => self.backup_dir.join(&artifact.file_name),
        };
        write_atomically(&path, artifact.contents.as_bytes()).map_err(|source| {
            StorageError::Write {
                path: path.clone(),
                source,
            }
        })?;
        tracing::info!(path = %path.display(), "exported snapshot");
        Ok(path)
    }

    pub fn import(&self, raw: &str) -> Result<Snapshot, ImportError> {
        let mut snapshot = Snapshot::from_json(raw)?;
        snapshot::migrate(&mut snapshot);
        self.save(&snapshot)?;
        tracing::info!(
            servers = snapshot.servers.len(),
            channels = snapshot.channels.len(),
            messages = snapshot.messages.len(),
            "imported snapshot"
        );
        Ok(snapshot)
    }

    pub fn import_file(&self, path: &Path) -> Result<Snapshot, ImportError> {
        let raw = fs::read_to_string(path).map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.import(&raw)
    }

    /// Overwrites the stored snapshot with the first-run seed. The previous
    /// payload stays in place if the write fails.
    pub fn reset(&self) -> Result<Snapshot, StorageError> {
        let snapshot = Snapshot::seeded(SystemClock.now());
        self.save(&snapshot)?;
        tracing::info!("storage reset to first-run snapshot");
        Ok(snapshot)
    }

    fn read_stored(&self) -> Result<Option<Snapshot>> {
        let Some(raw) = self.slot.get(&self.key)? else {
            return Ok(None);
        };
        let snapshot = Snapshot::from_json(&raw).context("parsing stored snapshot")?;
        Ok(Some(snapshot))
    }

    fn seed(&self) -> Snapshot {
        let snapshot = Snapshot::seeded(SystemClock.now());
        if let Err(err) = self.save(&snapshot) {
            tracing::warn!(?err, "failed to store first-run snapshot");
        }
        snapshot
    }
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    let slot = SqliteSlot::open(&paths.database_path, storage)?;
    Ok(StorageHandle::new(
        Arc::new(slot),
        &storage.slot_key,
        paths.backup_dir.clone(),
    ))
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

fn export_file_name(now: OffsetDateTime) -> String {
    let date = now
        .date()
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("{EXPORT_PREFIX}-{date}.{EXPORT_EXTENSION}")
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(EXPORT_TMP_EXTENSION);
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use crate::store::testing::{FailingSlot, MemorySlot};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn init_storage() -> anyhow::Result<(TempDir, StorageHandle, Arc<SqliteSlot>)> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        paths.ensure_directories()?;
        let options = StorageOptions::default();
        let slot = Arc::new(SqliteSlot::open(&paths.database_path, &options)?);
        let storage = StorageHandle::new(slot.clone(), &options.slot_key, paths.backup_dir);
        Ok((temp, storage, slot))
    }

    #[test]
    fn load_seeds_and_persists_when_slot_is_empty() -> anyhow::Result<()> {
        let (_temp, storage, slot) = init_storage()?;
        assert!(slot.get(storage.key())?.is_none());

        let first = storage.load();
        assert_eq!(first.servers.len(), 1);
        assert_eq!(first.channels.len(), 1);
        assert_eq!(first.messages.len(), 1);
        assert!(slot.get(storage.key())?.is_some());

        let second = storage.load();
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn load_replaces_malformed_payload_with_seed() -> anyhow::Result<()> {
        let (_temp, storage, slot) = init_storage()?;
        slot.set(storage.key(), "{not json")?;

        let snapshot = storage.load();
        assert_eq!(snapshot.servers.len(), 1);

        let stored = slot.get(storage.key())?.expect("reseeded payload");
        assert_eq!(Snapshot::from_json(&stored)?, snapshot);
        Ok(())
    }

    #[test]
    fn load_restamps_older_versions_without_touching_data() -> anyhow::Result<()> {
        let (_temp, storage, slot) = init_storage()?;
        let raw = r#"{"servers":[{"id":"s1","name":"Old","createdAt":5}],"channels":[],"messages":[]}"#;
        slot.set(storage.key(), raw)?;

        let snapshot = storage.load();
        assert_eq!(snapshot.version, SCHEMA_VERSION);
        assert_eq!(snapshot.servers[0].name, "Old");
        assert_eq!(snapshot.servers[0].icon, None);

        let stored = Snapshot::from_json(&slot.get(storage.key())?.expect("stored"))?;
        assert_eq!(stored.version, SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn export_then_import_round_trips() -> anyhow::Result<()> {
        let (_temp, storage, _slot) = init_storage()?;
        let mut snapshot = storage.load();
        snapshot.messages[0].is_bookmarked = Some(true);
        snapshot.messages[0].edited_at = Some(99);
        storage.save(&snapshot)?;

        let artifact = storage.export()?;
        assert!(artifact.file_name.starts_with("notecord-backup-"));
        assert!(artifact.file_name.ends_with(".json"));

        let imported = storage.import(&artifact.contents)?;
        assert_eq!(imported, snapshot);
        assert_eq!(storage.load(), snapshot);
        Ok(())
    }

    #[test]
    fn import_failure_leaves_stored_state_untouched() -> anyhow::Result<()> {
        let (_temp, storage, _slot) = init_storage()?;
        let before = storage.load();

        assert_matches!(
            storage.import(r#"{"servers": [], "messages": []}"#),
            Err(ImportError::MissingCollection("channels"))
        );
        assert_matches!(storage.import("definitely not json"), Err(ImportError::Parse(_)));
        assert_eq!(storage.load(), before);
        Ok(())
    }

    #[test]
    fn import_file_reports_missing_files() -> anyhow::Result<()> {
        let (temp, storage, _slot) = init_storage()?;
        let missing = temp.path().join("nope.json");
        assert_matches!(storage.import_file(&missing), Err(ImportError::Read { .. }));
        Ok(())
    }

    #[test]
    fn export_to_writes_dated_file_that_reimports() -> anyhow::Result<()> {
        let (temp, storage, _slot) = init_storage()?;
        let snapshot = storage.load();

        let path = storage.export_to(None)?;
        assert!(path.starts_with(storage.backup_dir()));
        assert!(path.exists());

        let explicit = temp.path().join("out").join("mine.json");
        let written = storage.export_to(Some(&explicit))?;
        assert_eq!(written, explicit);

        assert_eq!(storage.import_file(&path)?, snapshot);
        Ok(())
    }

    #[test]
    fn reset_discards_stored_state() -> anyhow::Result<()> {
        let (_temp, storage, _slot) = init_storage()?;
        let mut snapshot = storage.load();
        snapshot.servers[0].name = "Renamed".into();
        storage.save(&snapshot)?;

        let fresh = storage.reset()?;
        assert_ne!(fresh.servers[0].id, snapshot.servers[0].id);
        assert_eq!(storage.load(), fresh);
        Ok(())
    }

    #[test]
    fn failed_reset_keeps_previous_payload() -> anyhow::Result<()> {
        let slot = Arc::new(MemorySlot::default());
        let storage = StorageHandle::new(slot.clone(), "k", PathBuf::from("unused"));
        let mut snapshot = storage.load();
        snapshot.servers[0].name = "Precious".into();
        storage.save(&snapshot)?;

        slot.fail_writes();
        assert_matches!(storage.reset(), Err(StorageError::Slot(_)));
        assert_eq!(storage.load(), snapshot);
        Ok(())
    }

    #[test]
    fn save_failure_is_reported_to_caller() {
        let storage = StorageHandle::new(Arc::new(FailingSlot), "k", PathBuf::from("unused"));
        assert_matches!(storage.save(&Snapshot::empty()), Err(StorageError::Slot(_)));
        // load still hands back a usable snapshot even though seeding can't persist
        assert_eq!(storage.load().servers.len(), 1);
    }

    #[test]
    fn export_file_name_uses_calendar_date() {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("timestamp");
        assert_eq!(export_file_name(ts), "notecord-backup-2023-11-14.json");
    }
}
