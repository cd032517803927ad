use std::any::Any;

use crate::descriptor::{EmbeddedDescriptor, PropertyDescriptor, TypeDescriptor};
use crate::introspect::{allowed_timestamp_types, timestamp_now};
use crate::listener::{CallbackType, dispatch};
use crate::schema::{FieldMarker, Mapped, NestingStrategy};
use crate::{Introspector, Key, KeyDescriptor, MappingError, PropertyValue, Record, Value};

/// Operation a record is produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Insert,
    Update,
    Upsert,
    /// Update inside a batch or transaction; the version is incremented in
    /// the produced record only.
    BatchUpdate,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Insert => "insert",
            Intent::Update => "update",
            Intent::Upsert => "upsert",
            Intent::BatchUpdate => "batch update",
        }
    }

    fn pre_callback(&self) -> CallbackType {
        match self {
            Intent::Insert => CallbackType::PreInsert,
            Intent::Update | Intent::BatchUpdate => CallbackType::PreUpdate,
            Intent::Upsert => CallbackType::PreUpsert,
        }
    }

    fn post_callback(&self) -> CallbackType {
        match self {
            Intent::Insert => CallbackType::PostInsert,
            Intent::Update | Intent::BatchUpdate => CallbackType::PostUpdate,
            Intent::Upsert => CallbackType::PostUpsert,
        }
    }

    fn allows_incomplete_key(&self) -> bool {
        matches!(self, Intent::Insert | Intent::Upsert)
    }
}

/// Converts domain objects into records.
pub struct Marshaller<'a> {
    introspector: &'a Introspector,
}

impl<'a> Marshaller<'a> {
    pub fn new(introspector: &'a Introspector) -> Self {
        Self { introspector }
    }

    /// Produce the record for `entity` under `intent`.
    ///
    /// The entity is never modified; the version and timestamps written to
    /// the record are computed from its current values.
    pub fn marshal<T: Mapped>(&self, entity: &T, intent: Intent) -> Result<Record, MappingError> {
        let descriptor = self.introspector.introspect::<T>()?;
        self.marshal_entity(&descriptor, entity, intent)
    }

    pub fn marshal_optional<T: Mapped>(
        &self,
        entity: Option<&T>,
        intent: Intent,
    ) -> Result<Option<Record>, MappingError> {
        entity.map(|entity| self.marshal(entity, intent)).transpose()
    }

    /// Complete key of `entity`; the identifier must be set.
    pub fn marshal_key<T: Mapped>(&self, entity: &T) -> Result<Key, MappingError> {
        let descriptor = self.introspector.introspect::<T>()?;
        let key = build_key(&descriptor, entity, None)?;
        Ok(key)
    }

    pub(crate) fn marshal_entity(
        &self,
        descriptor: &TypeDescriptor,
        entity: &dyn Any,
        intent: Intent,
    ) -> Result<Record, MappingError> {
        dispatch(descriptor, intent.pre_callback(), entity)?;

        let mut record = Record::with_key(build_key(descriptor, entity, Some(intent))?);
        for property in descriptor.properties.values() {
            let value = match property.marker {
                Some(FieldMarker::Version) => next_version(descriptor, property, entity, intent)?,
                Some(FieldMarker::CreatedTimestamp) if intent == Intent::Insert => {
                    current_time(descriptor, property)?
                }
                Some(FieldMarker::UpdatedTimestamp) => current_time(descriptor, property)?,
                _ => read_property(descriptor.type_name, property, entity)?,
            };
            write_property(&mut record, property, value);
        }
        for site in &descriptor.embedded {
            marshal_site(descriptor.type_name, site, entity, &mut record)?;
        }

        tracing::trace!(
            type_name = descriptor.type_name,
            intent = intent.as_str(),
            properties = record.len(),
            "marshalled entity"
        );
        dispatch(descriptor, intent.post_callback(), entity)?;
        Ok(record)
    }
}

/// Key from the identifier and parent key. `intent` is `None` when a
/// complete key is required.
fn build_key(
    descriptor: &TypeDescriptor,
    entity: &dyn Any,
    intent: Option<Intent>,
) -> Result<Key, MappingError> {
    let type_name = descriptor.type_name;
    let identifier = descriptor
        .identifier
        .as_ref()
        .ok_or(MappingError::MissingIdentifier { type_name })?;
    let id = match identifier.accessor.get(entity)? {
        Some(value) => {
            identifier
                .codec
                .key_id(value)
                .map_err(|source| MappingError::Conversion {
                    type_name,
                    field: identifier.field_name.clone(),
                    source,
                })?
        }
        None => None,
    };
    let parent = match &descriptor.parent_key {
        Some(parent_key) => read_key(parent_key, entity)?,
        None => None,
    };

    match (id, intent) {
        (Some(id), _) => Ok(Key::from_parts(descriptor.kind.clone(), Some(id), parent)),
        (None, Some(intent)) if identifier.auto_generated && intent.allows_incomplete_key() => {
            Ok(Key::from_parts(descriptor.kind.clone(), None, parent))
        }
        (None, intent) => Err(MappingError::UnsetIdentifier {
            type_name,
            intent: intent.map_or("key", |intent| intent.as_str()),
        }),
    }
}

fn read_key(field: &KeyDescriptor, entity: &dyn Any) -> Result<Option<Key>, MappingError> {
    let Some(value) = field.accessor.get(entity)? else {
        return Ok(None);
    };
    value
        .downcast_ref::<Option<Key>>()
        .cloned()
        .ok_or(MappingError::TargetMismatch {
            expected: std::any::type_name::<Option<Key>>(),
        })
}

fn read_property(
    type_name: &'static str,
    property: &PropertyDescriptor,
    owner: &dyn Any,
) -> Result<Value, MappingError> {
    match property.accessor.get(owner)? {
        Some(value) => property
            .mapper
            .to_datastore(value)
            .map_err(|source| MappingError::Conversion {
                type_name,
                field: property.field_name.clone(),
                source,
            }),
        None => Ok(Value::Null),
    }
}

fn next_version(
    descriptor: &TypeDescriptor,
    property: &PropertyDescriptor,
    entity: &dyn Any,
    intent: Intent,
) -> Result<Value, MappingError> {
    if intent == Intent::Insert {
        return Ok(Value::Long(1));
    }
    let current = property
        .accessor
        .get(entity)?
        .and_then(|value| value.downcast_ref::<i64>())
        .copied()
        .ok_or(MappingError::TargetMismatch { expected: "i64" })?;
    current
        .checked_add(1)
        .map(Value::Long)
        .ok_or(MappingError::VersionOverflow {
            type_name: descriptor.type_name,
            current,
        })
}

fn current_time(
    descriptor: &TypeDescriptor,
    property: &PropertyDescriptor,
) -> Result<Value, MappingError> {
    let now = timestamp_now(property.declared.id()).ok_or_else(|| {
        MappingError::InvalidTimestampType {
            type_name: descriptor.type_name,
            field: property.field_name.clone(),
            allowed: allowed_timestamp_types(),
        }
    })?;
    let now: &dyn Any = &*now;
    property
        .mapper
        .to_datastore(now)
        .map_err(|source| MappingError::Conversion {
            type_name: descriptor.type_name,
            field: property.field_name.clone(),
            source,
        })
}

fn write_property(record: &mut Record, property: &PropertyDescriptor, value: Value) {
    record.set_property(
        property.mapped_name.clone(),
        PropertyValue::new(value, property.indexed),
    );
}

fn marshal_site(
    owner_type: &'static str,
    site: &EmbeddedDescriptor,
    owner: &dyn Any,
    record: &mut Record,
) -> Result<(), MappingError> {
    let value = site.accessor.get(owner)?;
    match site.strategy {
        NestingStrategy::Imploded => {
            let nested = match value {
                Some(value) => {
                    let mut nested = Record::new();
                    write_site_contents(site, value, &mut nested)?;
                    Value::Entity(Box::new(nested))
                }
                None => Value::Null,
            };
            record.set_property(
                site.mapped_name.clone(),
                PropertyValue::new(nested, site.indexed),
            );
        }
        NestingStrategy::Exploded => match value {
            Some(value) => write_site_contents(site, value, record)?,
            None => write_exploded_nulls(site, record),
        },
    }
    tracing::trace!(
        owner = owner_type,
        path = %site.path,
        strategy = ?site.strategy,
        null = value.is_none(),
        "marshalled embedded"
    );
    Ok(())
}

fn write_site_contents(
    site: &EmbeddedDescriptor,
    value: &dyn Any,
    target: &mut Record,
) -> Result<(), MappingError> {
    let type_name = site.descriptor.type_name;
    for property in &site.properties {
        let property_value = read_property(type_name, property, value)?;
        write_property(target, property, property_value);
    }
    for child in &site.embedded {
        marshal_site(type_name, child, value, target)?;
    }
    Ok(())
}

// A null exploded value still fills every descendant leaf.
fn write_exploded_nulls(site: &EmbeddedDescriptor, record: &mut Record) {
    for property in &site.properties {
        write_property(record, property, Value::Null);
    }
    for child in &site.embedded {
        match child.strategy {
            NestingStrategy::Exploded => write_exploded_nulls(child, record),
            NestingStrategy::Imploded => record.set_property(
                child.mapped_name.clone(),
                PropertyValue::new(Value::Null, child.indexed),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Address, Contact, DOCUMENT_EVENTS, Document, contact};
    use crate::{ErrorKind, KeyId};

    #[test]
    fn test_insert_with_unset_auto_id_produces_incomplete_key() {
        let introspector = Introspector::default();
        let marshaller = Marshaller::new(&introspector);
        let entity = Contact {
            id: 0,
            ..contact()
        };

        let record = marshaller.marshal(&entity, Intent::Insert).unwrap();
        let key = record.key().unwrap();
        assert_eq!(key.kind(), "Contact");
        assert!(!key.is_complete());

        let error = marshaller.marshal(&entity, Intent::Update).unwrap_err();
        assert!(matches!(
            error,
            MappingError::UnsetIdentifier {
                intent: "update",
                ..
            }
        ));
        assert!(marshaller.marshal_key(&entity).is_err());
    }

    #[test]
    fn test_properties_and_embedded_values() {
        let introspector = Introspector::default();
        let record = Marshaller::new(&introspector)
            .marshal(&contact(), Intent::Update)
            .unwrap();

        assert_eq!(record.key().unwrap().id(), Some(&KeyId::Id(7)));
        assert_eq!(record.get("name").and_then(Value::as_str), Some("Ada"));
        assert_eq!(record.get("residence.street").and_then(Value::as_str), Some("Elm"));
        assert_eq!(record.get("residence.city").and_then(Value::as_str), Some("Shelbyville"));

        let address = record.get("address").and_then(Value::as_record).unwrap();
        assert_eq!(address.get("street").and_then(Value::as_str), Some("Main"));
        assert_eq!(address.get("city").and_then(Value::as_str), Some("Springfield"));
        assert!(address.key().is_none());
    }

    #[test]
    fn test_version_increments_without_touching_entity() {
        let introspector = Introspector::default();
        let marshaller = Marshaller::new(&introspector);
        let entity = contact();

        for intent in [Intent::Update, Intent::Upsert, Intent::BatchUpdate] {
            let record = marshaller.marshal(&entity, intent).unwrap();
            assert_eq!(record.long("version"), Some(4));
        }
        assert_eq!(entity.version, 3);

        let inserted = marshaller.marshal(&entity, Intent::Insert).unwrap();
        assert_eq!(inserted.long("version"), Some(1));

        let overflowing = Contact {
            version: i64::MAX,
            ..contact()
        };
        let error = marshaller.marshal(&overflowing, Intent::Update).unwrap_err();
        assert!(matches!(error, MappingError::VersionOverflow { .. }));
        assert_eq!(error.kind(), ErrorKind::Mapping);
    }

    #[test]
    fn test_timestamps_follow_intent() {
        let introspector = Introspector::default();
        let marshaller = Marshaller::new(&introspector);

        let inserted = marshaller.marshal(&contact(), Intent::Insert).unwrap();
        assert!(matches!(inserted.get("created_at"), Some(Value::Timestamp(_))));
        assert!(matches!(inserted.get("updated_at"), Some(Value::Timestamp(_))));

        let updated = marshaller.marshal(&contact(), Intent::Update).unwrap();
        assert_eq!(updated.get("created_at"), Some(&Value::Null));
        assert!(matches!(updated.get("updated_at"), Some(Value::Timestamp(_))));
    }

    #[test]
    fn test_nulls_are_always_explicit() {
        let introspector = Introspector::default();
        let entity = Contact {
            email: None,
            address: None,
            home: None,
            ..contact()
        };
        let record = Marshaller::new(&introspector)
            .marshal(&entity, Intent::Update)
            .unwrap();

        assert_eq!(record.get("email"), Some(&Value::Null));
        assert_eq!(record.get("address"), Some(&Value::Null));
        assert_eq!(record.get("residence.street"), Some(&Value::Null));
        assert_eq!(record.get("residence.city"), Some(&Value::Null));
    }

    #[test]
    fn test_exploded_null_matches_all_null_value() {
        let introspector = Introspector::default();
        let marshaller = Marshaller::new(&introspector);

        let absent = Contact {
            home: None,
            ..contact()
        };
        let hollow = Contact {
            home: Some(Address::default()),
            ..contact()
        };

        let mut absent = marshaller.marshal(&absent, Intent::Update).unwrap();
        let mut hollow = marshaller.marshal(&hollow, Intent::Update).unwrap();
        absent.remove("updated_at");
        hollow.remove("updated_at");
        assert_eq!(absent, hollow);
    }

    #[test]
    fn test_listeners_run_ancestor_first_and_abort_on_error() {
        let introspector = Introspector::default();
        let marshaller = Marshaller::new(&introspector);
        DOCUMENT_EVENTS.lock().clear();

        let document = Document {
            id: "d1".to_string(),
            title: "Notes".to_string(),
            ..Document::default()
        };
        let record = marshaller.marshal(&document, Intent::Insert).unwrap();
        assert_eq!(record.key().unwrap().kind(), "Doc");
        assert_eq!(record.long("revision"), Some(1));
        assert!(!record.property("author").unwrap().indexed);
        assert_eq!(*DOCUMENT_EVENTS.lock(), vec!["audit", "document"]);

        let rejected = Document {
            title: "reject".to_string(),
            ..document
        };
        let error = marshaller.marshal(&rejected, Intent::Insert).unwrap_err();
        match &error {
            MappingError::Listener { callback, .. } => {
                assert_eq!(*callback, CallbackType::PreInsert)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(error.kind(), crate::ErrorKind::Listener);
    }

    #[test]
    fn test_parent_key_becomes_key_parent() {
        let introspector = Introspector::default();
        let parent = Key::new("Folder", "inbox");
        let document = Document {
            id: "d2".to_string(),
            parent: Some(parent.clone()),
            ..Document::default()
        };
        let key = Marshaller::new(&introspector).marshal_key(&document).unwrap();
        assert_eq!(key.parent(), Some(&parent));
        assert_eq!(key.id(), Some(&KeyId::Name("d2".to_string())));
    }

    #[test]
    fn test_untracked_timestamp_type_lists_allowed_types() {
        let introspector = Introspector::default();
        let descriptor = introspector.introspect::<Contact>().unwrap();
        let name = descriptor.properties.get("name").unwrap();

        let error = current_time(&descriptor, name).unwrap_err();
        assert!(matches!(error, MappingError::InvalidTimestampType { .. }));
        let message = error.to_string();
        assert!(message.contains("StorageDatetime"));
        assert!(message.contains("SystemTime"));
    }

    #[test]
    fn test_marshal_optional() {
        let introspector = Introspector::default();
        let marshaller = Marshaller::new(&introspector);
        assert!(
            marshaller
                .marshal_optional::<Contact>(None, Intent::Update)
                .unwrap()
                .is_none()
        );
        assert!(
            marshaller
                .marshal_optional(Some(&contact()), Intent::Update)
                .unwrap()
                .is_some()
        );
    }
}
