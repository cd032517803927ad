//! In-memory record store for entity-mapping.
//!
//! Keeps records in a process-local map and allocates numeric ids for
//! incomplete keys. Useful for tests and for embedding the mapper without a
//! datastore.
//!
//! # Example
//!
//! ```text
//! use entity_mapping::{EntityManager, RepositoryConnection};
//! use entity_mapping_memory::MemoryStore;
//!
//! let store = MemoryStore::connect("memory://").await?;
//! let manager = EntityManager::new(store);
//! let saved = manager.insert(&contact).await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod store;

pub use store::{MEMORY_SCHEME, MemoryStore};

// Re-export core types for convenience
pub use entity_mapping::{
    ConnectionConfig, EntityManager, Key, KeyId, MappingError, Record, RecordStore,
    RepositoryConnection,
};
