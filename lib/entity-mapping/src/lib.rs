//! Entity Mapping - Metadata-driven mapping between domain types and records.
//!
//! This crate converts domain objects to and from the schema-less key/value
//! records of a document datastore, driven by a declarative schema that each
//! type provides once.
//!
//! # Core Concepts
//!
//! - **Schema**: A type's declaration (entity, embeddable, ...) and the role of
//!   each field, usually generated by `#[derive(Mapped)]`.
//! - **Descriptor**: The validated structure of a type, built exactly once per
//!   type and cached by the [`Introspector`].
//! - **Record**: A [`Key`] plus named, tagged [`Value`]s. Embedded objects are
//!   either *imploded* into one nested record or *exploded* into dotted names.
//!
//! # Components
//!
//! - [`MapperRegistry`]: Value mappers resolved by declared field type
//! - [`Introspector`]: Builds and caches [`TypeDescriptor`]s
//! - [`Marshaller`]: Domain object → record, per [`Intent`]
//! - [`Unmarshaller`]: Record → domain object
//! - [`EntityManager`]: Marshal, store and read back through a [`RecordStore`]

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

mod access;
mod cache;
mod descriptor;
mod error;
#[cfg(test)]
mod fixtures;
mod introspect;
mod key;
mod listener;
mod mapper;
mod marshal;
mod repository;
mod schema;
mod time;
mod types;
mod unmarshal;
mod value;

pub use access::{ConstructorArgs, IdType, IdentifierValue};
pub use cache::{DescriptorCache, DescriptorKey, Purpose};
pub use descriptor::{
    EmbeddedDescriptor, IdentifierDescriptor, KeyDescriptor, PropertyDescriptor, TypeDescriptor,
};
pub use error::{ConversionError, ErrorKind, MappingError};
pub use introspect::Introspector;
pub use key::{Key, KeyId};
pub use listener::{CallbackType, ListenerBinding, ListenerError};
pub use mapper::{
    BlobMapper, BooleanMapper, CharMapper, DoubleMapper, FixedOffsetDateTimeMapper, FloatMapper,
    IntegerMapper, ListMapper, MapperRegistry, NaiveDateTimeMapper, OptionalMapper, RecordMapper,
    StorageDatetimeMapper, StringMapper, SystemTimeMapper, TypedMapper, UtcDateTimeMapper,
    ValueMapper,
};
pub use marshal::{Intent, Marshaller};
pub use repository::{
    ConnectionConfig, EntityManager, RecordStore, RepositoryConnection, check_version,
};
pub use schema::{
    Declaration, Embedded, FieldDefinition, FieldMarker, Identifier, IntoField, KeyField, Mapped,
    NestingStrategy, Property, PropertyOptions, Schema,
};
pub use time::StorageDatetime;
pub use types::{AnyValue, FieldType, ListAdapter, OptionAdapter, TypeRef, TypeReference, TypeShape};
pub use unmarshal::Unmarshaller;
pub use value::{Blob, PropertyValue, Record, Value};

// Re-export derive macro
pub use entity_mapping_derive::Mapped;
