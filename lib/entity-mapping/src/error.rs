use thiserror::Error;

use crate::listener::{CallbackType, ListenerError};

/// Failure raised by a value mapper while converting a single value.
///
/// The marshaller and unmarshaller wrap it in [`MappingError::Conversion`]
/// together with the owning type and field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ConversionError(String);

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub(crate) fn unexpected(expected: &str, found: &crate::Value) -> Self {
        Self(format!("expected {}, found {}", expected, found.type_name()))
    }

    pub(crate) fn type_mismatch(expected: &str) -> Self {
        Self(format!("expected a value of type {}", expected))
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Taxonomy bucket for a [`MappingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structural problem in a type description, found at introspection time.
    Schema,
    /// No usable construction path for an immutable type.
    Construction,
    /// Stored version does not match the expected version.
    OptimisticLock,
    /// A value could not be mapped between its domain and store forms.
    Mapping,
    /// A lifecycle listener rejected the operation.
    Listener,
    /// Failure reported by a record store.
    Storage,
}

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Type {type_name} must be declared as an entity or a projected entity")]
    NotAnEntity { type_name: &'static str },

    #[error("Projected entity {type_name} requires a non-blank kind")]
    BlankKind { type_name: &'static str },

    #[error("Type {type_name} requires a field with the identifier role")]
    MissingIdentifier { type_name: &'static str },

    #[error("Type {type_name} declares more than one {role} field ({field})")]
    DuplicateRole {
        type_name: &'static str,
        role: &'static str,
        field: String,
    },

    #[error("Field {field} in embeddable type {type_name} cannot hold the {role} role")]
    InvalidEmbeddedRole {
        type_name: &'static str,
        role: &'static str,
        field: String,
    },

    #[error("Invalid type, {found}, for {role} field {field} in type {type_name}; expected {expected}")]
    InvalidKeyType {
        type_name: &'static str,
        field: String,
        role: &'static str,
        found: &'static str,
        expected: &'static str,
    },

    #[error("Field {field} in type {type_name} must be of type i64, found {found}")]
    InvalidVersionType {
        type_name: &'static str,
        field: String,
        found: &'static str,
    },

    #[error("Field {field} in type {type_name} must be one of the following types - {allowed}")]
    InvalidTimestampType {
        type_name: &'static str,
        field: String,
        allowed: String,
    },

    #[error("Type {type_name} maps more than one field to property {property}")]
    DuplicateProperty {
        type_name: &'static str,
        property: String,
    },

    #[error("Type {type_name} overrides the kind of its owner but is not declared embeddable")]
    KindOverrideNotEmbeddable { type_name: &'static str },

    #[error("Parameterized type {type_name} requires {expected} generic types, found {found}")]
    GenericArity {
        type_name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Generic parameter {parameter} of {type_name} is bound to {bound}, but {found} was supplied")]
    GenericBinding {
        type_name: &'static str,
        parameter: String,
        bound: &'static str,
        found: &'static str,
    },

    #[error("Type {type_name} has no generic parameter {parameter} (field {field})")]
    UnknownTypeParameter {
        type_name: &'static str,
        parameter: String,
        field: String,
    },

    #[error("Property override {path} on type {type_name} does not match any inherited or embedded property")]
    UnknownPropertyOverride { type_name: &'static str, path: String },

    #[error("Type {type_name} embeds itself through field {field}")]
    RecursiveEmbedding { type_name: &'static str, field: String },

    #[error("Type {type_name} requires a no-argument construction path")]
    MissingConstructionPath { type_name: &'static str },

    #[error("No suitable mapper found for field {field} of type {declared} in type {type_name}")]
    NoMapper {
        type_name: &'static str,
        field: String,
        declared: &'static str,
    },

    #[error("Failed to convert field {field} in type {type_name}: {source}")]
    Conversion {
        type_name: &'static str,
        field: String,
        #[source]
        source: ConversionError,
    },

    #[error("Type {type_name} requires a public constructor with {count} parameters")]
    NoMatchingConstructor { type_name: &'static str, count: usize },

    #[error("All constructor fields of type {type_name} must have a name binding")]
    UnnamedConstructorParameter { type_name: &'static str },

    #[error("Constructor argument {name} for type {type_name} is missing or has the wrong type")]
    ConstructorArgument { type_name: &'static str, name: String },

    #[error("Identifier of {type_name} must be set for {intent}")]
    UnsetIdentifier {
        type_name: &'static str,
        intent: &'static str,
    },

    #[error("Record for {type_name} has no complete key")]
    MissingRecordKey { type_name: &'static str },

    #[error("Field {field} of {type_name} has no writer")]
    ReadOnlyField { type_name: &'static str, field: String },

    #[error("Expected an instance of {expected}")]
    TargetMismatch { expected: &'static str },

    #[error("Version of {type_name} cannot be incremented past {current}")]
    VersionOverflow { type_name: &'static str, current: i64 },

    #[error("{callback:?} listener on {type_name} failed: {source}")]
    Listener {
        type_name: &'static str,
        callback: CallbackType,
        #[source]
        source: ListenerError,
    },

    #[error("Optimistic lock failure: {0}")]
    OptimisticLock(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl MappingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MappingError::NoMatchingConstructor { .. }
            | MappingError::UnnamedConstructorParameter { .. }
            | MappingError::ConstructorArgument { .. } => ErrorKind::Construction,
            MappingError::OptimisticLock(_) => ErrorKind::OptimisticLock,
            MappingError::Conversion { .. }
            | MappingError::UnsetIdentifier { .. }
            | MappingError::MissingRecordKey { .. }
            | MappingError::ReadOnlyField { .. }
            | MappingError::TargetMismatch { .. }
            | MappingError::VersionOverflow { .. }
            | MappingError::SerializationError(_) => ErrorKind::Mapping,
            MappingError::Listener { .. } => ErrorKind::Listener,
            MappingError::StorageError(_) | MappingError::NotFound(_) => ErrorKind::Storage,
            _ => ErrorKind::Schema,
        }
    }

    /// None of the mapping failures succeed on a blind retry; an optimistic
    /// lock conflict needs a fresh read first.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
