use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use super::EntityStore;
use crate::model::{Clock, Timestamp};
use crate::storage::{KeyValueSlot, Snapshot, StorageHandle};

#[derive(Default)]
pub(crate) struct MemorySlot {
    values: Mutex<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl MemorySlot {
    /// Makes every later `set` fail while keeping stored values readable.
    pub(crate) fn fail_writes(&self) {
        self.read_only.store(true, Ordering::SeqCst);
    }
}

impl KeyValueSlot for MemorySlot {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub(crate) struct FailingSlot;

impl KeyValueSlot for FailingSlot {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        anyhow::bail!("storage quota exceeded")
    }
}

pub(crate) struct ManualClock(AtomicI64);

impl ManualClock {
    pub(crate) fn new(start: Timestamp) -> Self {
        Self(AtomicI64::new(start))
    }

    pub(crate) fn set(&self, now: Timestamp) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn memory_storage() -> StorageHandle {
    StorageHandle::new(
        Arc::new(MemorySlot::default()),
        "test-slot",
        PathBuf::from("backups"),
    )
}

/// Store with no entities, backed by an in-memory slot holding the same
/// empty snapshot.
pub(crate) fn empty_store() -> (EntityStore, Arc<ManualClock>) {
    let storage = memory_storage();
    let snapshot = Snapshot::empty();
    storage.save(&snapshot).expect("memory slot accepts writes");
    let clock = Arc::new(ManualClock::new(0));
    let store = EntityStore::from_snapshot(snapshot, storage, clock.clone());
    (store, clock)
}

pub(crate) fn seeded_store() -> (EntityStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let store = EntityStore::open(memory_storage(), clock.clone());
    (store, clock)
}

pub(crate) fn failing_store() -> EntityStore {
    let storage = StorageHandle::new(Arc::new(FailingSlot), "test-slot", PathBuf::from("backups"));
    EntityStore::from_snapshot(
        Snapshot::empty(),
        storage,
        Arc::new(ManualClock::new(0)),
    )
}
