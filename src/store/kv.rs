use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;
use uuid::Uuid;

use crate::models::Rid;

/// Durable local key-value storage, supplied by the embedding platform.
///
/// Implementations swallow their own I/O failures: a failed read surfaces as
/// `None` (cache miss), a failed write as `Err` which callers treat as
/// best-effort.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
}

/// In-memory store for tests and embedders without a platform store.
#[derive(Default)]
pub struct MemoryKvStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.inner
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Storage key for a database's diff watermark.
pub fn rid_storage_key(database_id: &Uuid) -> String {
    format!("blob_rid:{}", database_id)
}

/// Read the persisted watermark. Absent or unreadable values are a cache
/// miss, never an error — the diff simply restarts from the beginning.
pub fn load_rid(store: &dyn KvStore, database_id: &Uuid) -> Option<Rid> {
    let raw = store.get(&rid_storage_key(database_id))?;
    match serde_json::from_str(&raw) {
        Ok(rid) => Some(rid),
        Err(e) => {
            warn!(
                "Discarding unreadable watermark for database '{}': {}",
                database_id, e
            );
            None
        }
    }
}

/// Persist the watermark after a successful apply. Failures are logged and
/// swallowed: the worst case is re-fetching already-applied changes.
pub fn store_rid(store: &dyn KvStore, database_id: &Uuid, rid: &Rid) {
    let raw = match serde_json::to_string(rid) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to encode watermark {} for '{}': {}", rid, database_id, e);
            return;
        }
    };
    if let Err(e) = store.set(&rid_storage_key(database_id), &raw) {
        warn!(
            "Failed to persist watermark {} for database '{}': {}",
            rid, database_id, e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_round_trips() {
        let store = MemoryKvStore::new();
        let database_id = Uuid::new_v4();
        assert_eq!(load_rid(&store, &database_id), None);
        store_rid(&store, &database_id, &Rid::new(7, 2));
        assert_eq!(load_rid(&store, &database_id), Some(Rid::new(7, 2)));
    }

    #[test]
    fn corrupt_watermark_reads_as_miss() {
        let store = MemoryKvStore::new();
        let database_id = Uuid::new_v4();
        store
            .set(&rid_storage_key(&database_id), "definitely not json")
            .unwrap();
        assert_eq!(load_rid(&store, &database_id), None);
    }

    #[test]
    fn storage_key_is_scoped_per_database() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(rid_storage_key(&a), rid_storage_key(&b));
        assert!(rid_storage_key(&a).starts_with("blob_rid:"));
    }
}
