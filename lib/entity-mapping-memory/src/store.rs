//! Map-backed implementation of RecordStore.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use entity_mapping::{
    ConnectionConfig, Key, MappingError, Record, RecordStore, RepositoryConnection, check_version,
};
use parking_lot::Mutex;

/// URL scheme accepted by [`MemoryStore::connect`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Records keyed by their complete key.
///
/// Clones share the same underlying map.
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<Key, Record>>>,
    next_id: Arc<AtomicI64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a store whose first allocated id is `first_id`.
    pub fn starting_at(first_id: i64) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(first_id)),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Complete `key` with a freshly allocated id if it has none.
    fn complete(&self, key: &Key) -> Key {
        if key.is_complete() {
            return key.clone();
        }
        key.completed(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

fn record_key(record: &Record) -> Result<Key, MappingError> {
    record
        .key()
        .cloned()
        .ok_or_else(|| MappingError::StorageError("Record has no key".to_string()))
}

fn complete_key(record: &Record) -> Result<Key, MappingError> {
    let key = record_key(record)?;
    if !key.is_complete() {
        return Err(MappingError::StorageError(format!(
            "Key {} is incomplete",
            key
        )));
    }
    Ok(key)
}

#[async_trait]
impl RepositoryConnection for MemoryStore {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, MappingError> {
        let config = config.into();
        if !config.url().starts_with(MEMORY_SCHEME) {
            return Err(MappingError::StorageError(format!(
                "Unsupported store URL: {}",
                config.url()
            )));
        }
        tracing::debug!(url = config.url(), "connected to memory store");
        Ok(Self::new())
    }

    async fn initialize(&self) -> Result<(), MappingError> {
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Record>, MappingError> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn insert(&self, mut record: Record) -> Result<Key, MappingError> {
        let key = self.complete(&record_key(&record)?);
        let mut records = self.records.lock();
        if records.contains_key(&key) {
            return Err(MappingError::StorageError(format!(
                "Entity already exists: {}",
                key
            )));
        }
        record.set_key(key.clone());
        records.insert(key.clone(), record);
        tracing::trace!(%key, "inserted record");
        Ok(key)
    }

    async fn update(&self, record: Record) -> Result<(), MappingError> {
        let key = complete_key(&record)?;
        let mut records = self.records.lock();
        let Some(slot) = records.get_mut(&key) else {
            return Err(MappingError::NotFound(key.to_string()));
        };
        *slot = record;
        tracing::trace!(%key, "updated record");
        Ok(())
    }

    async fn upsert(&self, mut record: Record) -> Result<Key, MappingError> {
        let key = self.complete(&record_key(&record)?);
        record.set_key(key.clone());
        self.records.lock().insert(key.clone(), record);
        tracing::trace!(%key, "upserted record");
        Ok(key)
    }

    async fn delete(&self, key: &Key) -> Result<(), MappingError> {
        self.records.lock().remove(key);
        Ok(())
    }

    async fn update_versioned(
        &self,
        record: Record,
        version_property: &str,
        expected: i64,
    ) -> Result<(), MappingError> {
        let key = complete_key(&record)?;
        let mut records = self.records.lock();
        let Some(slot) = records.get_mut(&key) else {
            return Err(MappingError::OptimisticLock(format!(
                "Entity does not exist: {}",
                key
            )));
        };
        check_version(slot, version_property, expected)?;
        *slot = record;
        Ok(())
    }
}
