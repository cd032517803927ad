use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use crate::access::{ConstructorArgs, FieldAccessor};
use crate::descriptor::{Construction, EmbeddedDescriptor, PropertyDescriptor, TypeDescriptor};
use crate::listener::{CallbackType, dispatch};
use crate::schema::{Mapped, NestingStrategy};
use crate::types::AnyValue;
use crate::{ConversionError, Introspector, MappingError, Record, Value};

enum Resolved {
    Value(AnyValue),
    Embedded(Option<AnyValue>),
}

struct ResolvedField {
    name: String,
    accessor: Arc<dyn FieldAccessor>,
    value: Resolved,
}

/// Rebuilds domain objects from records.
pub struct Unmarshaller<'a> {
    introspector: &'a Introspector,
}

impl<'a> Unmarshaller<'a> {
    pub fn new(introspector: &'a Introspector) -> Self {
        Self { introspector }
    }

    /// Rebuild a `T` from `record`; `None` in, `None` out.
    pub fn unmarshal<T: Mapped>(&self, record: Option<&Record>) -> Result<Option<T>, MappingError> {
        let Some(record) = record else {
            return Ok(None);
        };
        let descriptor = self.introspector.introspect::<T>()?;
        let entity = build::<T>(&descriptor, record)?;
        dispatch(&descriptor, CallbackType::PostLoad, &entity)?;
        Ok(Some(entity))
    }

    /// Rebuild a just-written record without firing load listeners.
    pub(crate) fn rebuild<T: Mapped>(&self, record: &Record) -> Result<T, MappingError> {
        let descriptor = self.introspector.introspect::<T>()?;
        build::<T>(&descriptor, record)
    }
}

fn build<T: Mapped>(descriptor: &TypeDescriptor, record: &Record) -> Result<T, MappingError> {
    unmarshal_entity(descriptor, record)?
        .downcast::<T>()
        .map(|entity| *entity)
        .map_err(|_| MappingError::TargetMismatch {
            expected: std::any::type_name::<T>(),
        })
}

fn unmarshal_entity(descriptor: &TypeDescriptor, record: &Record) -> Result<AnyValue, MappingError> {
    let type_name = descriptor.type_name;
    let mut fields = Vec::new();

    if let Some(identifier) = &descriptor.identifier {
        let id = record
            .key()
            .and_then(|key| key.id())
            .ok_or(MappingError::MissingRecordKey { type_name })?;
        let value = identifier
            .codec
            .from_key_id(id)
            .map_err(|source| MappingError::Conversion {
                type_name,
                field: identifier.field_name.clone(),
                source,
            })?;
        fields.push(ResolvedField {
            name: identifier.field_name.clone(),
            accessor: identifier.accessor.clone(),
            value: Resolved::Value(value),
        });
    }
    if let Some(key) = &descriptor.key {
        fields.push(ResolvedField {
            name: key.field_name.clone(),
            accessor: key.accessor.clone(),
            value: Resolved::Value(Box::new(record.key().cloned())),
        });
    }
    if let Some(parent_key) = &descriptor.parent_key {
        fields.push(ResolvedField {
            name: parent_key.field_name.clone(),
            accessor: parent_key.accessor.clone(),
            value: Resolved::Value(Box::new(
                record.key().and_then(|key| key.parent()).cloned(),
            )),
        });
    }

    resolve_contents(
        descriptor,
        descriptor.properties.values().map(|p| p.as_ref()),
        &descriptor.embedded,
        record,
        &mut fields,
    )?;

    tracing::trace!(
        type_name,
        kind = %descriptor.kind,
        fields = fields.len(),
        "unmarshalled record"
    );
    construct(descriptor, fields)
}

/// Resolve property and embedded values held in `record`.
///
/// Absent names are skipped: a mutable field keeps its default and an
/// immutable type must have a constructor over the names that were present.
/// Exploded sites always recurse, so an all-null site yields a hollow value.
fn resolve_contents<'p>(
    descriptor: &TypeDescriptor,
    properties: impl Iterator<Item = &'p PropertyDescriptor>,
    sites: &[EmbeddedDescriptor],
    record: &Record,
    out: &mut Vec<ResolvedField>,
) -> Result<(), MappingError> {
    let type_name = descriptor.type_name;

    for property in properties {
        let Some(value) = record.get(&property.mapped_name) else {
            continue;
        };
        let model = property
            .mapper
            .to_model(value)
            .map_err(|source| MappingError::Conversion {
                type_name,
                field: property.field_name.clone(),
                source,
            })?;
        out.push(ResolvedField {
            name: property.field_name.clone(),
            accessor: property.accessor.clone(),
            value: Resolved::Value(model),
        });
    }

    for site in sites {
        let value = match site.strategy {
            NestingStrategy::Imploded => match record.get(&site.mapped_name) {
                None => continue,
                Some(Value::Null) => None,
                Some(Value::Entity(nested)) => Some(unmarshal_site(site, nested)?),
                Some(other) => {
                    return Err(MappingError::Conversion {
                        type_name,
                        field: site.field_name.clone(),
                        source: ConversionError::unexpected("Entity", other),
                    });
                }
            },
            NestingStrategy::Exploded => Some(unmarshal_site(site, record)?),
        };
        out.push(ResolvedField {
            name: site.field_name.clone(),
            accessor: site.accessor.clone(),
            value: Resolved::Embedded(value),
        });
    }
    Ok(())
}

fn unmarshal_site(site: &EmbeddedDescriptor, record: &Record) -> Result<AnyValue, MappingError> {
    let mut fields = Vec::new();
    resolve_contents(
        &site.descriptor,
        site.properties.iter(),
        &site.embedded,
        record,
        &mut fields,
    )?;
    construct(&site.descriptor, fields)
}

fn construct(
    descriptor: &TypeDescriptor,
    fields: Vec<ResolvedField>,
) -> Result<AnyValue, MappingError> {
    match &descriptor.construction {
        Construction::Mutable(instantiate) => {
            let mut target = instantiate();
            for field in fields {
                let value = match field.value {
                    Resolved::Value(value) | Resolved::Embedded(Some(value)) => value,
                    Resolved::Embedded(None) => continue,
                };
                let target: &mut dyn Any = &mut *target;
                field.accessor.set(target, value)?;
            }
            Ok(target)
        }
        Construction::Immutable(constructors) => {
            let type_name = descriptor.type_name;
            let names: HashSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();
            let count = names.len();

            let mut unnamed = false;
            let mut selected = None;
            for constructor in constructors.iter().filter(|c| c.params.len() == count) {
                if constructor.params.iter().any(Option::is_none) {
                    unnamed = true;
                    continue;
                }
                let params: HashSet<&str> = constructor
                    .params
                    .iter()
                    .flatten()
                    .map(String::as_str)
                    .collect();
                if params == names {
                    selected = Some(constructor);
                    break;
                }
            }
            let constructor = match selected {
                Some(constructor) => constructor,
                None if unnamed => {
                    return Err(MappingError::UnnamedConstructorParameter { type_name });
                }
                None => return Err(MappingError::NoMatchingConstructor { type_name, count }),
            };

            let mut args = ConstructorArgs::new(type_name);
            for field in fields {
                match field.value {
                    Resolved::Value(value) => args.insert_value(field.name, value),
                    Resolved::Embedded(value) => args.insert_embedded(field.name, value),
                }
            }
            (constructor.build)(&mut args)
        }
    }
}
