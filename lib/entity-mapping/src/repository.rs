//! Record store seam and the entity manager built on it.
//!
//! - `RecordStore`: Key/record storage implemented by backends
//! - `RepositoryConnection`: Backend connection and initialization
//! - `EntityManager`: Drives marshal → store → unmarshal for mapped types

use std::sync::Arc;

use async_trait::async_trait;

use crate::listener::{CallbackType, dispatch};
use crate::schema::Mapped;
use crate::{Intent, Introspector, Key, KeyId, Marshaller, MappingError, Record, Unmarshaller};

/// Connection configuration for record store backends.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Connect using a store URL string.
    Url(String),
}

impl ConnectionConfig {
    pub fn url(&self) -> &str {
        match self {
            ConnectionConfig::Url(url) => url,
        }
    }
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// Trait for store connection and initialization.
#[async_trait]
pub trait RepositoryConnection: Sized + Send + Sync {
    /// Connect to the store using the provided configuration.
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, MappingError>;

    /// Prepare the store for use.
    async fn initialize(&self) -> Result<(), MappingError>;
}

/// Key/record storage used by the [`EntityManager`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Record>, MappingError>;

    /// Write a new record and return its complete key.
    ///
    /// An incomplete key gets an id allocated by the store.
    async fn insert(&self, record: Record) -> Result<Key, MappingError>;

    /// Replace an existing record.
    async fn update(&self, record: Record) -> Result<(), MappingError>;

    /// Insert or replace a record and return its complete key.
    async fn upsert(&self, record: Record) -> Result<Key, MappingError>;

    async fn delete(&self, key: &Key) -> Result<(), MappingError>;

    /// Replace a record only if its stored version equals `expected`.
    ///
    /// The default implementation reads, compares and writes without any
    /// isolation; backends should override it with an atomic compare.
    async fn update_versioned(
        &self,
        record: Record,
        version_property: &str,
        expected: i64,
    ) -> Result<(), MappingError> {
        let key = record
            .key()
            .cloned()
            .ok_or_else(|| MappingError::StorageError("Record has no key".to_string()))?;
        let stored = self.get(&key).await?.ok_or_else(|| {
            MappingError::OptimisticLock(format!("Entity does not exist: {}", key))
        })?;
        check_version(&stored, version_property, expected)?;
        self.update(record).await
    }
}

/// Compare the stored version of `stored` against `expected`.
pub fn check_version(
    stored: &Record,
    version_property: &str,
    expected: i64,
) -> Result<(), MappingError> {
    let found = stored.long(version_property).unwrap_or_default();
    if found != expected {
        return Err(MappingError::OptimisticLock(format!(
            "Expecting version {}, but found {}",
            expected, found
        )));
    }
    Ok(())
}

/// Entity-level operations over a [`RecordStore`].
///
/// Writes return the entity as stored: allocated ids, incremented versions
/// and auto-managed timestamps are read back from the written record.
pub struct EntityManager<S> {
    store: S,
    introspector: Arc<Introspector>,
}

impl<S: RecordStore> EntityManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_introspector(store, Arc::new(Introspector::default()))
    }

    pub fn with_introspector(store: S, introspector: Arc<Introspector>) -> Self {
        Self {
            store,
            introspector,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn introspector(&self) -> &Arc<Introspector> {
        &self.introspector
    }

    fn marshaller(&self) -> Marshaller<'_> {
        Marshaller::new(&self.introspector)
    }

    fn unmarshaller(&self) -> Unmarshaller<'_> {
        Unmarshaller::new(&self.introspector)
    }

    pub async fn insert<T: Mapped>(&self, entity: &T) -> Result<T, MappingError> {
        let mut record = self.marshaller().marshal(entity, Intent::Insert)?;
        let key = self.store.insert(record.clone()).await?;
        tracing::debug!(%key, "inserted entity");
        record.set_key(key);
        self.unmarshaller().rebuild(&record)
    }

    pub async fn update<T: Mapped>(&self, entity: &T) -> Result<T, MappingError> {
        let record = self.marshaller().marshal(entity, Intent::Update)?;
        self.store.update(record.clone()).await?;
        tracing::debug!(key = ?record.key(), "updated entity");
        self.unmarshaller().rebuild(&record)
    }

    pub async fn upsert<T: Mapped>(&self, entity: &T) -> Result<T, MappingError> {
        let mut record = self.marshaller().marshal(entity, Intent::Upsert)?;
        let key = self.store.upsert(record.clone()).await?;
        tracing::debug!(%key, "upserted entity");
        record.set_key(key);
        self.unmarshaller().rebuild(&record)
    }

    /// Update `entity` only if the stored version still equals its in-memory
    /// version. Types without a version field fall back to [`Self::update`].
    pub async fn update_with_optimistic_lock<T: Mapped>(
        &self,
        entity: &T,
    ) -> Result<T, MappingError> {
        let descriptor = self.introspector.introspect::<T>()?;
        let Some(version) = descriptor.version() else {
            return self.update(entity).await;
        };
        let version_property = version.mapped_name().to_string();

        let record = self.marshaller().marshal(entity, Intent::Update)?;
        let expected = record
            .long(&version_property)
            .and_then(|next| next.checked_sub(1))
            .ok_or_else(|| {
                MappingError::StorageError(format!(
                    "Record has no version property {}",
                    version_property
                ))
            })?;
        if let Err(error) = self
            .store
            .update_versioned(record.clone(), &version_property, expected)
            .await
        {
            tracing::debug!(key = ?record.key(), %error, "optimistic lock update failed");
            return Err(error);
        }
        tracing::debug!(key = ?record.key(), version = expected + 1, "updated versioned entity");
        self.unmarshaller().rebuild(&record)
    }

    pub async fn load<T: Mapped>(&self, key: &Key) -> Result<Option<T>, MappingError> {
        let record = self.store.get(key).await?;
        self.unmarshaller().unmarshal(record.as_ref())
    }

    /// Load an entity of `T`'s kind by id.
    pub async fn load_by_id<T: Mapped>(
        &self,
        id: impl Into<KeyId>,
    ) -> Result<Option<T>, MappingError> {
        let descriptor = self.introspector.introspect::<T>()?;
        let key = Key::new(descriptor.kind(), id);
        self.load(&key).await
    }

    pub async fn delete<T: Mapped>(&self, entity: &T) -> Result<(), MappingError> {
        let descriptor = self.introspector.introspect::<T>()?;
        dispatch(&descriptor, CallbackType::PreDelete, entity)?;
        let key = self.marshaller().marshal_key(entity)?;
        self.store.delete(&key).await?;
        tracing::debug!(%key, "deleted entity");
        dispatch(&descriptor, CallbackType::PostDelete, entity)
    }

    pub async fn delete_by_key(&self, key: &Key) -> Result<(), MappingError> {
        self.store.delete(key).await?;
        tracing::debug!(%key, "deleted record");
        Ok(())
    }
}
