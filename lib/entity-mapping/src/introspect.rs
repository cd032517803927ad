//! Type introspection.
//!
//! The [`Introspector`] walks a type's schema once, validates it and produces
//! an immutable [`TypeDescriptor`]. Descriptors are cached per type, generic
//! arguments and purpose; concurrent requests for the same key build it
//! exactly once.
//!
//! The walk:
//! 1. resolves the kind from the entity or projected-entity declaration,
//! 2. binds the caller's generic arguments to the declared parameters,
//! 3. collects property overrides,
//! 4. gathers own fields, then fields of mapped-superclass ancestors,
//! 5. classifies each field as identifier, key, parent key, embedded or
//!    property, resolving value mappers and checking marker types,
//! 6. requires an identifier (entities only),
//! 7. resolves embedded sites, then rejects unused overrides and duplicate
//!    mapped names per record namespace.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::access::{FieldAccessor, ProjectedAccessor, Projection};
use crate::cache::{DescriptorCache, DescriptorKey, Purpose};
use crate::descriptor::{
    Construction, EmbeddedDescriptor, IdentifierDescriptor, KeyDescriptor, PropertyDescriptor,
    TypeDescriptor, collect_site_names,
};
use crate::listener::{ListenerBinding, ListenerHandler, ProjectedListener};
use crate::schema::{
    BaseSpec, Declaration, FieldMarker, FieldRole, FieldSpec, Mapped, NestingStrategy, PropertyOptions,
    TypeSchema,
};
use crate::types::{AnyValue, TypeRef, TypeReference};
use crate::{Key, MapperRegistry, MappingError, StorageDatetime};

struct TimestampType {
    id: TypeId,
    name: &'static str,
    now: fn() -> AnyValue,
}

fn timestamp_type<T: Any>(now: fn() -> AnyValue) -> TimestampType {
    TimestampType {
        id: TypeId::of::<T>(),
        name: std::any::type_name::<T>(),
        now,
    }
}

fn now_millis() -> i64 {
    StorageDatetime::now().0.timestamp_millis()
}

fn now_utc() -> DateTime<Utc> {
    StorageDatetime::now().0
}

// Sorted by TypeId for binary search.
static TIMESTAMP_TYPES: Lazy<Vec<TimestampType>> = Lazy::new(|| {
    let mut types = vec![
        timestamp_type::<i64>(|| Box::new(now_millis())),
        timestamp_type::<Option<i64>>(|| Box::new(Some(now_millis()))),
        timestamp_type::<StorageDatetime>(|| Box::new(StorageDatetime::now())),
        timestamp_type::<Option<StorageDatetime>>(|| Box::new(Some(StorageDatetime::now()))),
        timestamp_type::<DateTime<Utc>>(|| Box::new(now_utc())),
        timestamp_type::<Option<DateTime<Utc>>>(|| Box::new(Some(now_utc()))),
        timestamp_type::<DateTime<FixedOffset>>(|| {
            Box::new(DateTime::<FixedOffset>::from(now_utc()))
        }),
        timestamp_type::<Option<DateTime<FixedOffset>>>(|| {
            Box::new(Some(DateTime::<FixedOffset>::from(now_utc())))
        }),
        timestamp_type::<NaiveDateTime>(|| Box::new(now_utc().naive_utc())),
        timestamp_type::<Option<NaiveDateTime>>(|| Box::new(Some(now_utc().naive_utc()))),
        timestamp_type::<SystemTime>(|| Box::new(SystemTime::from(now_utc()))),
        timestamp_type::<Option<SystemTime>>(|| Box::new(Some(SystemTime::from(now_utc())))),
    ];
    types.sort_by_key(|t| t.id);
    types
});

fn is_timestamp_type(declared: TypeId) -> bool {
    TIMESTAMP_TYPES
        .binary_search_by_key(&declared, |t| t.id)
        .is_ok()
}

/// Current instant in the representation of an allow-listed timestamp type.
pub(crate) fn timestamp_now(declared: TypeId) -> Option<AnyValue> {
    TIMESTAMP_TYPES
        .binary_search_by_key(&declared, |t| t.id)
        .ok()
        .and_then(|index| TIMESTAMP_TYPES.get(index))
        .map(|t| (t.now)())
}

pub(crate) fn allowed_timestamp_types() -> String {
    let mut names: Vec<&str> = TIMESTAMP_TYPES.iter().map(|t| t.name).collect();
    names.sort_unstable();
    names.join(", ")
}

/// Builds and caches type descriptors.
pub struct Introspector {
    registry: Arc<MapperRegistry>,
    cache: DescriptorCache,
}

impl Default for Introspector {
    fn default() -> Self {
        Self::new(Arc::new(MapperRegistry::new()))
    }
}

impl Introspector {
    pub fn new(registry: Arc<MapperRegistry>) -> Self {
        Self {
            registry,
            cache: DescriptorCache::new(),
        }
    }

    pub fn registry(&self) -> &Arc<MapperRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    /// Descriptor of entity type `T`.
    pub fn introspect<T: Mapped>(&self) -> Result<Arc<TypeDescriptor>, MappingError> {
        self.introspect_reference(&TypeReference::of::<T>())
    }

    /// Descriptor of an entity type named by a (possibly parameterized) reference.
    pub fn introspect_reference(
        &self,
        reference: &TypeReference,
    ) -> Result<Arc<TypeDescriptor>, MappingError> {
        let key = DescriptorKey::new(
            reference.type_id(),
            reference
                .arguments()
                .map(|args| args.iter().map(TypeRef::id).collect())
                .unwrap_or_default(),
            Purpose::Entity,
        );
        if let Some(descriptor) = self.cache.get(&key) {
            return Ok(descriptor);
        }
        self.cache.get_or_try_init(key, || {
            TypeWalk {
                introspector: self,
                purpose: Purpose::Entity,
            }
            .build(reference.describe(), reference.arguments())
        })
    }

    fn embedded_descriptor(
        &self,
        describe: fn() -> TypeSchema,
        type_id: TypeId,
    ) -> Result<Arc<TypeDescriptor>, MappingError> {
        let key = DescriptorKey::new(type_id, Vec::new(), Purpose::Embedded);
        if let Some(descriptor) = self.cache.get(&key) {
            return Ok(descriptor);
        }
        self.cache.get_or_try_init(key, || {
            TypeWalk {
                introspector: self,
                purpose: Purpose::Embedded,
            }
            .build(describe(), None)
        })
    }
}

/// Embedded field waiting for site resolution.
struct PendingSite {
    field_name: String,
    options: PropertyOptions,
    strategy: NestingStrategy,
    accessor: Arc<dyn FieldAccessor>,
    nested: Arc<TypeDescriptor>,
}

struct TypeWalk<'a> {
    introspector: &'a Introspector,
    purpose: Purpose,
}

impl TypeWalk<'_> {
    fn build(
        self,
        schema: TypeSchema,
        arguments: Option<&[TypeRef]>,
    ) -> Result<TypeDescriptor, MappingError> {
        // Nested descriptors are built while this slot is held, so cycles
        // must be ruled out before any nested slot is taken.
        if self.purpose == Purpose::Entity {
            check_embedding_graph(&schema)?;
        }
        let descriptor = self.walk(schema, arguments)?;
        tracing::debug!(
            type_name = descriptor.type_name,
            kind = %descriptor.kind,
            purpose = ?self.purpose,
            properties = descriptor.properties.len(),
            embedded = descriptor.embedded.len(),
            "built type descriptor"
        );
        Ok(descriptor)
    }

    fn resolve_kind(&self, schema: &TypeSchema) -> Result<String, MappingError> {
        match (&schema.declaration, self.purpose) {
            (Declaration::Entity { kind }, _) => Ok(kind
                .clone()
                .filter(|kind| !kind.trim().is_empty())
                .unwrap_or_else(|| schema.simple_name().to_string())),
            (Declaration::ProjectedEntity { kind }, _) => {
                if kind.trim().is_empty() {
                    Err(MappingError::BlankKind {
                        type_name: schema.type_name,
                    })
                } else {
                    Ok(kind.clone())
                }
            }
            (_, Purpose::Entity) => Err(MappingError::NotAnEntity {
                type_name: schema.type_name,
            }),
            (_, Purpose::Embedded) => Ok(schema.simple_name().to_string()),
        }
    }

    fn walk(
        &self,
        schema: TypeSchema,
        arguments: Option<&[TypeRef]>,
    ) -> Result<TypeDescriptor, MappingError> {
        let type_name = schema.type_name;
        let mut kind = self.resolve_kind(&schema)?;
        let bindings = bind_generics(&schema, arguments)?;
        let overrides: IndexMap<String, PropertyOptions> = schema.overrides.into_iter().collect();
        let mut used_overrides: HashSet<String> = HashSet::new();

        let (fields, listeners) = collect_fields(schema.fields, schema.base, schema.listeners);

        let mut identifier: Option<IdentifierDescriptor> = None;
        let mut key: Option<KeyDescriptor> = None;
        let mut parent_key: Option<KeyDescriptor> = None;
        let mut properties: IndexMap<String, Arc<PropertyDescriptor>> = IndexMap::new();
        let mut version = None;
        let mut created_timestamp = None;
        let mut updated_timestamp = None;
        let mut pending_sites = Vec::new();

        for (field, inherited) in fields {
            let role = field.role.label();
            let is_parent = matches!(field.role, FieldRole::ParentKey);
            match field.role {
                FieldRole::Identifier {
                    auto_generated,
                    codec,
                } => {
                    self.forbid_in_embedded(type_name, role, &field.name)?;
                    if identifier.is_some() {
                        return Err(MappingError::DuplicateRole {
                            type_name,
                            role,
                            field: field.name,
                        });
                    }
                    identifier = Some(IdentifierDescriptor {
                        field_name: field.name,
                        declared: field.declared,
                        auto_generated,
                        codec,
                        accessor: field.accessor,
                    });
                }
                FieldRole::Key | FieldRole::ParentKey => {
                    self.forbid_in_embedded(type_name, role, &field.name)?;
                    if !field.declared.is::<Option<Key>>() {
                        return Err(MappingError::InvalidKeyType {
                            type_name,
                            field: field.name,
                            role,
                            found: field.declared.name(),
                            expected: std::any::type_name::<Option<Key>>(),
                        });
                    }
                    let slot = if is_parent { &mut parent_key } else { &mut key };
                    if slot.is_some() {
                        return Err(MappingError::DuplicateRole {
                            type_name,
                            role,
                            field: field.name,
                        });
                    }
                    *slot = Some(KeyDescriptor {
                        field_name: field.name,
                        accessor: field.accessor,
                    });
                }
                FieldRole::Embedded {
                    describe,
                    strategy,
                    options,
                } => {
                    reify(
                        type_name,
                        &field.name,
                        field.type_param.as_deref(),
                        &field.declared,
                        &bindings,
                    )?;
                    let nested = self
                        .introspector
                        .embedded_descriptor(describe, field.declared.id())?;
                    if let Some(kind_override) = &nested.kind_override {
                        if nested.declaration != Declaration::Embeddable {
                            return Err(MappingError::KindOverrideNotEmbeddable {
                                type_name: nested.type_name,
                            });
                        }
                        kind = kind_override.clone();
                    }
                    pending_sites.push(PendingSite {
                        field_name: field.name,
                        options,
                        strategy,
                        accessor: field.accessor,
                        nested,
                    });
                }
                FieldRole::Property { options, marker } => {
                    let declared = reify(
                        type_name,
                        &field.name,
                        field.type_param.as_deref(),
                        &field.declared,
                        &bindings,
                    )?;
                    let mapper = self.introspector.registry.resolve(&declared).ok_or_else(|| {
                        MappingError::NoMapper {
                            type_name,
                            field: field.name.clone(),
                            declared: declared.name(),
                        }
                    })?;
                    let marker = match self.purpose {
                        Purpose::Entity => marker,
                        Purpose::Embedded => None,
                    };
                    let mut property = PropertyDescriptor {
                        mapped_name: options.name.clone().unwrap_or_else(|| field.name.clone()),
                        field_name: field.name,
                        declared,
                        indexed: options.indexed,
                        optional: options.optional,
                        marker,
                        mapper,
                        accessor: field.accessor,
                    };
                    if inherited {
                        if let Some(override_options) = overrides.get(&property.field_name) {
                            used_overrides.insert(property.field_name.clone());
                            let name = override_options
                                .name
                                .clone()
                                .unwrap_or_else(|| property.mapped_name.clone());
                            property.apply(name, override_options);
                        }
                    }
                    check_marker(type_name, &property)?;

                    let property = Arc::new(property);
                    match property.marker {
                        Some(FieldMarker::Version) => version = Some(property.clone()),
                        Some(FieldMarker::CreatedTimestamp) => {
                            created_timestamp = Some(property.clone())
                        }
                        Some(FieldMarker::UpdatedTimestamp) => {
                            updated_timestamp = Some(property.clone())
                        }
                        None => {}
                    }
                    if properties
                        .insert(property.mapped_name.clone(), property.clone())
                        .is_some()
                    {
                        return Err(MappingError::DuplicateProperty {
                            type_name,
                            property: property.mapped_name.clone(),
                        });
                    }
                }
            }
        }

        if self.purpose == Purpose::Entity && identifier.is_none() {
            return Err(MappingError::MissingIdentifier { type_name });
        }

        let embedded: Vec<EmbeddedDescriptor> = pending_sites
            .into_iter()
            .map(|site| {
                resolve_site(
                    SiteSpec {
                        field_name: &site.field_name,
                        options: &site.options,
                        strategy: site.strategy,
                        accessor: site.accessor.clone(),
                        nested: &site.nested,
                    },
                    "",
                    "",
                    &overrides,
                    &mut used_overrides,
                )
            })
            .collect();

        if let Some(path) = overrides.keys().find(|path| !used_overrides.contains(*path)) {
            return Err(MappingError::UnknownPropertyOverride {
                type_name,
                path: path.clone(),
            });
        }

        let mut names: Vec<&str> = properties.keys().map(String::as_str).collect();
        for site in &embedded {
            collect_site_names(site, &mut names);
        }
        ensure_unique(type_name, names)?;
        for site in &embedded {
            check_site_namespace(type_name, site)?;
        }

        let construction = if schema.immutable {
            Construction::Immutable(schema.constructors)
        } else {
            Construction::Mutable(
                schema
                    .instantiate
                    .ok_or(MappingError::MissingConstructionPath { type_name })?,
            )
        };

        Ok(TypeDescriptor {
            type_id: schema.type_id,
            type_name,
            kind,
            declaration: schema.declaration,
            kind_override: schema.kind_override,
            identifier,
            key,
            parent_key,
            properties,
            embedded,
            version,
            created_timestamp,
            updated_timestamp,
            construction,
            overrides,
            generic_bindings: bindings,
            listeners,
        })
    }

    fn forbid_in_embedded(
        &self,
        type_name: &'static str,
        role: &'static str,
        field: &str,
    ) -> Result<(), MappingError> {
        if self.purpose == Purpose::Embedded {
            return Err(MappingError::InvalidEmbeddedRole {
                type_name,
                role,
                field: field.to_string(),
            });
        }
        Ok(())
    }
}

/// Reject a type whose embedded fields lead back to a type already on the
/// embedding path.
fn check_embedding_graph(schema: &TypeSchema) -> Result<(), MappingError> {
    let mut path = vec![schema.type_id];
    let mut cleared = HashSet::new();
    visit_embedded(schema, &mut path, &mut cleared)
}

fn visit_embedded(
    schema: &TypeSchema,
    path: &mut Vec<TypeId>,
    cleared: &mut HashSet<TypeId>,
) -> Result<(), MappingError> {
    let mut ancestors = Vec::new();
    let mut base = schema.base.as_ref().map(|base| base.describe);
    while let Some(describe) = base {
        let ancestor = describe();
        if ancestor.declaration != Declaration::MappedSuperclass {
            break;
        }
        base = ancestor.base.as_ref().map(|base| base.describe);
        ancestors.push(ancestor);
    }

    for owner in std::iter::once(schema).chain(&ancestors) {
        for field in &owner.fields {
            let FieldRole::Embedded { describe, .. } = &field.role else {
                continue;
            };
            let nested = field.declared.id();
            if path.contains(&nested) {
                return Err(MappingError::RecursiveEmbedding {
                    type_name: schema.type_name,
                    field: field.name.clone(),
                });
            }
            if cleared.contains(&nested) {
                continue;
            }
            path.push(nested);
            let result = visit_embedded(&describe(), path, cleared);
            path.pop();
            result?;
            cleared.insert(nested);
        }
    }
    Ok(())
}

/// Own fields followed by mapped-superclass fields, nearest ancestor first.
/// Listeners come back ancestor-first.
fn collect_fields(
    own_fields: Vec<FieldSpec>,
    base: Option<BaseSpec>,
    own_listeners: Vec<ListenerBinding>,
) -> (Vec<(FieldSpec, bool)>, Vec<ListenerBinding>) {
    let mut fields: Vec<(FieldSpec, bool)> = own_fields.into_iter().map(|f| (f, false)).collect();
    let mut ancestor_listeners: Vec<Vec<ListenerBinding>> = Vec::new();
    let mut chain: Vec<Arc<dyn Projection>> = Vec::new();

    let mut next = base;
    while let Some(base) = next {
        let base_schema = (base.describe)();
        if base_schema.declaration != Declaration::MappedSuperclass {
            break;
        }
        chain.push(base.projection);
        for mut field in base_schema.fields {
            field.accessor = project_accessor(&chain, field.accessor);
            fields.push((field, true));
        }
        ancestor_listeners.push(
            base_schema
                .listeners
                .into_iter()
                .map(|binding| project_listener(&chain, binding))
                .collect(),
        );
        next = base_schema.base;
    }

    let listeners = ancestor_listeners
        .into_iter()
        .rev()
        .flatten()
        .chain(own_listeners)
        .collect();
    (fields, listeners)
}

fn project_accessor(
    chain: &[Arc<dyn Projection>],
    inner: Arc<dyn FieldAccessor>,
) -> Arc<dyn FieldAccessor> {
    chain.iter().rev().fold(inner, |inner, projection| {
        Arc::new(ProjectedAccessor {
            projection: projection.clone(),
            inner,
        })
    })
}

fn project_listener(chain: &[Arc<dyn Projection>], binding: ListenerBinding) -> ListenerBinding {
    let handler = chain.iter().rev().fold(binding.handler, |inner, projection| {
        Arc::new(ProjectedListener {
            projection: projection.clone(),
            inner,
        }) as Arc<dyn ListenerHandler>
    });
    ListenerBinding {
        handler,
        ..binding
    }
}

fn bind_generics(
    schema: &TypeSchema,
    arguments: Option<&[TypeRef]>,
) -> Result<Vec<(String, TypeRef)>, MappingError> {
    if let Some(arguments) = arguments {
        if arguments.len() != schema.type_params.len() {
            return Err(MappingError::GenericArity {
                type_name: schema.type_name,
                expected: schema.type_params.len(),
                found: arguments.len(),
            });
        }
        for ((parameter, bound), argument) in schema.type_params.iter().zip(arguments) {
            if bound != argument {
                return Err(MappingError::GenericBinding {
                    type_name: schema.type_name,
                    parameter: parameter.clone(),
                    bound: bound.name(),
                    found: argument.name(),
                });
            }
        }
    }
    Ok(schema.type_params.clone())
}

/// Concrete declared type of a field, checked against its generic binding.
fn reify(
    type_name: &'static str,
    field: &str,
    type_param: Option<&str>,
    declared: &TypeRef,
    bindings: &[(String, TypeRef)],
) -> Result<TypeRef, MappingError> {
    let Some(parameter) = type_param else {
        return Ok(declared.clone());
    };
    let (_, bound) = bindings
        .iter()
        .find(|(name, _)| name == parameter)
        .ok_or_else(|| MappingError::UnknownTypeParameter {
            type_name,
            parameter: parameter.to_string(),
            field: field.to_string(),
        })?;
    if bound.id() != declared.id() {
        return Err(MappingError::GenericBinding {
            type_name,
            parameter: parameter.to_string(),
            bound: bound.name(),
            found: declared.name(),
        });
    }
    Ok(declared.clone())
}

fn check_marker(type_name: &'static str, property: &PropertyDescriptor) -> Result<(), MappingError> {
    match property.marker {
        Some(FieldMarker::Version) if !property.declared.is::<i64>() => {
            Err(MappingError::InvalidVersionType {
                type_name,
                field: property.field_name.clone(),
                found: property.declared.name(),
            })
        }
        Some(FieldMarker::CreatedTimestamp | FieldMarker::UpdatedTimestamp)
            if !is_timestamp_type(property.declared.id()) =>
        {
            Err(MappingError::InvalidTimestampType {
                type_name,
                field: property.field_name.clone(),
                allowed: allowed_timestamp_types(),
            })
        }
        _ => Ok(()),
    }
}

struct SiteSpec<'a> {
    field_name: &'a str,
    options: &'a PropertyOptions,
    strategy: NestingStrategy,
    accessor: Arc<dyn FieldAccessor>,
    nested: &'a Arc<TypeDescriptor>,
}

/// Resolve the names of one embedding site and, recursively, its children.
///
/// `prefix` is the dotted prefix contributed by exploded ancestors within the
/// current record namespace. An override replaces the full mapped name.
fn resolve_site(
    site: SiteSpec<'_>,
    parent_path: &str,
    prefix: &str,
    overrides: &IndexMap<String, PropertyOptions>,
    used: &mut HashSet<String>,
) -> EmbeddedDescriptor {
    let path = if parent_path.is_empty() {
        site.field_name.to_string()
    } else {
        format!("{}.{}", parent_path, site.field_name)
    };
    let own_name = site
        .options
        .name
        .clone()
        .unwrap_or_else(|| site.field_name.to_string());
    let (mapped_name, indexed, optional) = match overrides.get(&path) {
        Some(options) => {
            used.insert(path.clone());
            (
                options
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}{}", prefix, own_name)),
                options.indexed,
                options.optional,
            )
        }
        None => (
            format!("{}{}", prefix, own_name),
            site.options.indexed,
            site.options.optional,
        ),
    };
    let child_prefix = match site.strategy {
        NestingStrategy::Exploded => format!("{}.", mapped_name),
        NestingStrategy::Imploded => String::new(),
    };

    let properties = site
        .nested
        .properties
        .values()
        .map(|property| {
            let mut property = property.as_ref().clone();
            let property_path = format!("{}.{}", path, property.field_name);
            match overrides.get(&property_path) {
                Some(options) => {
                    let name = options
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{}{}", child_prefix, property.mapped_name));
                    property.apply(name, options);
                    used.insert(property_path);
                }
                None => {
                    property.mapped_name = format!("{}{}", child_prefix, property.mapped_name);
                }
            }
            property
        })
        .collect();

    let embedded = site
        .nested
        .embedded
        .iter()
        .map(|child| {
            resolve_site(
                SiteSpec {
                    field_name: &child.field_name,
                    options: &child.options,
                    strategy: child.strategy,
                    accessor: child.accessor.clone(),
                    nested: &child.descriptor,
                },
                &path,
                &child_prefix,
                overrides,
                used,
            )
        })
        .collect();

    EmbeddedDescriptor {
        field_name: site.field_name.to_string(),
        path,
        mapped_name,
        strategy: site.strategy,
        indexed,
        optional,
        options: site.options.clone(),
        accessor: site.accessor,
        descriptor: site.nested.clone(),
        properties,
        embedded,
    }
}

fn ensure_unique<'a>(
    type_name: &'static str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), MappingError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(MappingError::DuplicateProperty {
                type_name,
                property: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Each imploded site opens its own namespace inside its nested record.
fn check_site_namespace(
    type_name: &'static str,
    site: &EmbeddedDescriptor,
) -> Result<(), MappingError> {
    if site.strategy == NestingStrategy::Imploded {
        let mut names: Vec<&str> = site.properties.iter().map(|p| p.mapped_name.as_str()).collect();
        for child in &site.embedded {
            collect_site_names(child, &mut names);
        }
        ensure_unique(type_name, names)?;
    }
    for child in &site.embedded {
        check_site_namespace(type_name, child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::fixtures::{Address, Contact, Document};
    use crate::{CallbackType, Embedded, FieldType, Identifier, KeyField, Property, Schema};

    fn error_of<T: Mapped>() -> MappingError {
        Introspector::default().introspect::<T>().unwrap_err()
    }

    #[test]
    fn test_contact_descriptor() {
        let introspector = Introspector::default();
        let descriptor = introspector.introspect::<Contact>().unwrap();

        assert_eq!(descriptor.kind(), "Contact");
        assert_eq!(descriptor.identifier().unwrap().field_name(), "id");
        assert!(descriptor.identifier().unwrap().is_auto_generated());
        assert_eq!(descriptor.version().unwrap().field_name(), "version");
        assert_eq!(descriptor.created_timestamp().unwrap().field_name(), "created_at");
        assert_eq!(descriptor.updated_timestamp().unwrap().field_name(), "updated_at");
        assert!(descriptor.property("email").unwrap().is_optional());
        assert!(!descriptor.is_immutable());

        let names = descriptor.record_names();
        assert_eq!(
            names,
            vec![
                "name",
                "email",
                "version",
                "created_at",
                "updated_at",
                "address",
                "residence.street",
                "residence.city",
            ]
        );

        let address = &descriptor.embedded()[0];
        assert_eq!(address.strategy(), NestingStrategy::Imploded);
        assert!(address.property("street").is_some());
        let home = &descriptor.embedded()[1];
        assert_eq!(home.path(), "home");
        assert_eq!(home.mapped_name(), "residence");
        assert!(home.property("residence.city").is_some());
    }

    #[test]
    fn test_mapped_superclass_fields_and_overrides() {
        let descriptor = Introspector::default().introspect::<Document>().unwrap();

        assert_eq!(descriptor.kind(), "Doc");
        let author = descriptor.property("author").unwrap();
        assert_eq!(author.field_name(), "created_by");
        assert!(!author.is_indexed());
        assert!(descriptor.property("created_by").is_none());
        assert_eq!(descriptor.version().unwrap().mapped_name(), "revision");
        assert_eq!(descriptor.key().unwrap().field_name(), "key");
        assert_eq!(descriptor.parent_key().unwrap().field_name(), "parent");

        let declared: Vec<&str> = descriptor
            .listeners()
            .iter()
            .map(|binding| binding.declared_on())
            .collect();
        assert!(declared[0].ends_with("Audit"));
        assert!(declared[1].ends_with("Document"));
        assert!(
            descriptor
                .listeners()
                .iter()
                .all(|binding| binding.callback() == CallbackType::PreInsert)
        );
    }

    static COUNTED_SCHEMAS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Counted {
        id: i64,
    }

    impl Mapped for Counted {
        fn schema() -> Schema<Self> {
            COUNTED_SCHEMAS.fetch_add(1, Ordering::SeqCst);
            Schema::entity()
                .instantiate_with(Counted::default)
                .field(Identifier::new("id", |c: &Counted| &c.id).writer(|c, v| c.id = v))
        }
    }

    #[test]
    fn test_concurrent_introspection_walks_schema_once() {
        let introspector = Introspector::default();
        let descriptors: Vec<Arc<TypeDescriptor>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| introspector.introspect::<Counted>().unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        assert_eq!(COUNTED_SCHEMAS.load(Ordering::SeqCst), 1);
        assert!(
            descriptors
                .windows(2)
                .all(|pair| Arc::ptr_eq(&pair[0], &pair[1]))
        );
    }

    #[test]
    fn test_embeddable_is_not_an_entity() {
        assert!(matches!(
            error_of::<Address>(),
            MappingError::NotAnEntity { .. }
        ));
    }

    struct Blank {
        id: i64,
    }

    impl Mapped for Blank {
        fn schema() -> Schema<Self> {
            Schema::projected("  ")
                .instantiate_with(|| Blank { id: 0 })
                .field(Identifier::new("id", |b: &Blank| &b.id))
        }
    }

    #[test]
    fn test_projected_entity_requires_kind() {
        assert!(matches!(error_of::<Blank>(), MappingError::BlankKind { .. }));
    }

    #[derive(Default)]
    struct NoId {
        name: String,
    }

    impl Mapped for NoId {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(NoId::default)
                .field(Property::new("name", |n: &NoId| &n.name))
        }
    }

    #[test]
    fn test_entity_requires_identifier() {
        assert!(matches!(
            error_of::<NoId>(),
            MappingError::MissingIdentifier { .. }
        ));
    }

    #[derive(Default)]
    struct TwoIds {
        id: i64,
        other: String,
    }

    impl Mapped for TwoIds {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(TwoIds::default)
                .field(Identifier::new("id", |t: &TwoIds| &t.id))
                .field(Identifier::new("other", |t: &TwoIds| &t.other))
        }
    }

    #[test]
    fn test_duplicate_identifier() {
        match error_of::<TwoIds>() {
            MappingError::DuplicateRole { role, field, .. } => {
                assert_eq!(role, "identifier");
                assert_eq!(field, "other");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Default)]
    struct BadKey {
        id: i64,
        key: Option<String>,
    }

    impl Mapped for BadKey {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(BadKey::default)
                .field(Identifier::new("id", |b: &BadKey| &b.id))
                .field(KeyField::key("key", |b: &BadKey| &b.key))
        }
    }

    #[test]
    fn test_key_field_must_hold_key() {
        match error_of::<BadKey>() {
            MappingError::InvalidKeyType { field, role, .. } => {
                assert_eq!(field, "key");
                assert_eq!(role, "key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Default)]
    struct BadVersion {
        id: i64,
        version: i32,
    }

    impl Mapped for BadVersion {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(BadVersion::default)
                .field(Identifier::new("id", |b: &BadVersion| &b.id))
                .field(Property::new("version", |b: &BadVersion| &b.version).version())
        }
    }

    #[derive(Default)]
    struct BadTimestamp {
        id: i64,
        created: String,
    }

    impl Mapped for BadTimestamp {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(BadTimestamp::default)
                .field(Identifier::new("id", |b: &BadTimestamp| &b.id))
                .field(Property::new("created", |b: &BadTimestamp| &b.created).created_timestamp())
        }
    }

    #[test]
    fn test_marker_types_are_checked() {
        assert!(matches!(
            error_of::<BadVersion>(),
            MappingError::InvalidVersionType { .. }
        ));
        match error_of::<BadTimestamp>() {
            MappingError::InvalidTimestampType { field, allowed, .. } => {
                assert_eq!(field, "created");
                assert!(allowed.contains("SystemTime"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timestamp_allow_list() {
        assert!(is_timestamp_type(TypeId::of::<i64>()));
        assert!(is_timestamp_type(TypeId::of::<Option<NaiveDateTime>>()));
        assert!(!is_timestamp_type(TypeId::of::<String>()));

        let now = timestamp_now(TypeId::of::<Option<DateTime<Utc>>>()).unwrap();
        assert!(now.downcast_ref::<Option<DateTime<Utc>>>().unwrap().is_some());
        assert!(timestamp_now(TypeId::of::<i32>()).is_none());
    }

    #[derive(Default)]
    struct Clash {
        id: i64,
        flat: Option<String>,
        home: Option<Address>,
    }

    impl Mapped for Clash {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(Clash::default)
                .field(Identifier::new("id", |c: &Clash| &c.id))
                .field(Property::new("flat", |c: &Clash| &c.flat).mapped_name("home.city"))
                .field(Embedded::new("home", |c: &Clash| c.home.as_ref()))
        }
    }

    #[test]
    fn test_exploded_names_share_owner_namespace() {
        match error_of::<Clash>() {
            MappingError::DuplicateProperty { property, .. } => assert_eq!(property, "home.city"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Default)]
    struct Relocated {
        id: i64,
        home: Option<Address>,
        work: Option<Address>,
    }

    impl Mapped for Relocated {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(Relocated::default)
                .property_override("home.city", PropertyOptions::new().name("town"))
                .property_override("work", PropertyOptions::new().name("office").optional(true))
                .field(Identifier::new("id", |r: &Relocated| &r.id))
                .field(Embedded::new("home", |r: &Relocated| r.home.as_ref()))
                .field(Embedded::new("work", |r: &Relocated| r.work.as_ref()).imploded())
        }
    }

    #[test]
    fn test_overrides_replace_embedded_names() {
        let descriptor = Introspector::default().introspect::<Relocated>().unwrap();
        assert_eq!(
            descriptor.record_names(),
            vec!["home.street", "town", "office"]
        );
        assert!(descriptor.embedded()[1].is_optional());
        assert_eq!(descriptor.overrides().count(), 2);
    }

    #[derive(Default)]
    struct Stray {
        id: i64,
        name: String,
    }

    impl Mapped for Stray {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(Stray::default)
                .property_override("name", PropertyOptions::new().name("title"))
                .field(Identifier::new("id", |s: &Stray| &s.id))
                .field(Property::new("name", |s: &Stray| &s.name))
        }
    }

    #[test]
    fn test_override_must_match_inherited_or_embedded_path() {
        match error_of::<Stray>() {
            MappingError::UnknownPropertyOverride { path, .. } => assert_eq!(path, "name"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Default)]
    struct Node {
        label: Option<String>,
        child: Option<Box<Node>>,
    }

    impl Mapped for Node {
        fn schema() -> Schema<Self> {
            Schema::embeddable()
                .instantiate_with(Node::default)
                .field(Property::new("label", |n: &Node| &n.label))
                .field(Embedded::new("child", |n: &Node| n.child.as_deref()))
        }
    }

    #[derive(Default)]
    struct Tree {
        id: i64,
        root: Option<Node>,
    }

    impl Mapped for Tree {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(Tree::default)
                .field(Identifier::new("id", |t: &Tree| &t.id))
                .field(Embedded::new("root", |t: &Tree| t.root.as_ref()))
        }
    }

    #[test]
    fn test_recursive_embedding_is_rejected() {
        match error_of::<Tree>() {
            MappingError::RecursiveEmbedding { field, .. } => assert_eq!(field, "child"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Default)]
    struct Left {
        right: Option<Box<Right>>,
    }

    #[derive(Default)]
    struct Right {
        left: Option<Box<Left>>,
    }

    impl Mapped for Left {
        fn schema() -> Schema<Self> {
            Schema::embeddable()
                .instantiate_with(Left::default)
                .field(Embedded::new("right", |l: &Left| l.right.as_deref()))
        }
    }

    impl Mapped for Right {
        fn schema() -> Schema<Self> {
            Schema::embeddable()
                .instantiate_with(Right::default)
                .field(Embedded::new("left", |r: &Right| r.left.as_deref()))
        }
    }

    #[derive(Default)]
    struct LeftOwner {
        id: i64,
        left: Option<Left>,
    }

    impl Mapped for LeftOwner {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(LeftOwner::default)
                .field(Identifier::new("id", |o: &LeftOwner| &o.id))
                .field(Embedded::new("left", |o: &LeftOwner| o.left.as_ref()))
        }
    }

    #[derive(Default)]
    struct RightOwner {
        id: i64,
        right: Option<Right>,
    }

    impl Mapped for RightOwner {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(RightOwner::default)
                .field(Identifier::new("id", |o: &RightOwner| &o.id))
                .field(Embedded::new("right", |o: &RightOwner| o.right.as_ref()))
        }
    }

    #[test]
    fn test_mutual_embedding_fails_from_concurrent_owners() {
        for _ in 0..16 {
            let introspector = Introspector::default();
            let (left, right) = std::thread::scope(|scope| {
                let left = scope.spawn(|| introspector.introspect::<LeftOwner>());
                let right = scope.spawn(|| introspector.introspect::<RightOwner>());
                (left.join().unwrap(), right.join().unwrap())
            });

            assert!(matches!(left, Err(MappingError::RecursiveEmbedding { .. })));
            assert!(matches!(right, Err(MappingError::RecursiveEmbedding { .. })));
            assert!(introspector.cache().is_empty());
        }
    }

    #[derive(Default)]
    struct Tag {
        label: Option<String>,
    }

    impl Mapped for Tag {
        fn schema() -> Schema<Self> {
            Schema::embeddable()
                .override_kind("Tagged")
                .instantiate_with(Tag::default)
                .field(Property::new("label", |t: &Tag| &t.label))
        }
    }

    #[derive(Default)]
    struct Loose {
        label: Option<String>,
    }

    impl Mapped for Loose {
        fn schema() -> Schema<Self> {
            Schema::plain()
                .override_kind("Loose")
                .instantiate_with(Loose::default)
                .field(Property::new("label", |l: &Loose| &l.label))
        }
    }

    #[derive(Default)]
    struct Labelled<E> {
        id: i64,
        tag: Option<E>,
    }

    impl<E: Mapped + Default> Mapped for Labelled<E> {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(Labelled::<E>::default)
                .field(Identifier::new("id", |l: &Labelled<E>| &l.id))
                .field(Embedded::new("tag", |l: &Labelled<E>| l.tag.as_ref()).imploded())
        }
    }

    #[test]
    fn test_kind_override_from_embeddable_only() {
        let descriptor = Introspector::default()
            .introspect::<Labelled<Tag>>()
            .unwrap();
        assert_eq!(descriptor.kind(), "Tagged");

        assert!(matches!(
            error_of::<Labelled<Loose>>(),
            MappingError::KindOverrideNotEmbeddable { .. }
        ));
    }

    #[derive(Default)]
    struct IdentifiedPart {
        id: i64,
    }

    impl Mapped for IdentifiedPart {
        fn schema() -> Schema<Self> {
            Schema::embeddable()
                .instantiate_with(IdentifiedPart::default)
                .field(Identifier::new("id", |p: &IdentifiedPart| &p.id))
        }
    }

    #[test]
    fn test_embedded_types_cannot_hold_identifiers() {
        assert!(matches!(
            error_of::<Labelled<IdentifiedPart>>(),
            MappingError::InvalidEmbeddedRole { .. }
        ));
    }

    #[derive(Default)]
    struct Wrapper<V> {
        id: i64,
        value: V,
    }

    impl<V: FieldType + Default> Mapped for Wrapper<V> {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(Wrapper::<V>::default)
                .type_parameter::<V>("V")
                .field(Identifier::new("id", |w: &Wrapper<V>| &w.id))
                .field(Property::new("value", |w: &Wrapper<V>| &w.value).generic("V"))
        }
    }

    #[test]
    fn test_generic_arguments_are_bound() {
        let introspector = Introspector::default();

        let bound = introspector
            .introspect_reference(&TypeReference::parameterized::<Wrapper<i64>>(vec![
                TypeRef::of::<i64>(),
            ]))
            .unwrap();
        let bindings: Vec<(&str, &TypeRef)> = bound.generic_bindings().collect();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, "V");
        assert!(bindings[0].1.is::<i64>());

        let arity = introspector
            .introspect_reference(&TypeReference::parameterized::<Wrapper<i64>>(Vec::new()))
            .unwrap_err();
        assert!(matches!(
            arity,
            MappingError::GenericArity {
                expected: 1,
                found: 0,
                ..
            }
        ));

        let mismatch = introspector
            .introspect_reference(&TypeReference::parameterized::<Wrapper<i64>>(vec![
                TypeRef::of::<String>(),
            ]))
            .unwrap_err();
        assert!(matches!(mismatch, MappingError::GenericBinding { .. }));
    }

    struct Opaque;

    impl FieldType for Opaque {}

    struct Unmappable {
        id: i64,
        opaque: Opaque,
    }

    impl Mapped for Unmappable {
        fn schema() -> Schema<Self> {
            Schema::entity()
                .instantiate_with(|| Unmappable {
                    id: 0,
                    opaque: Opaque,
                })
                .field(Identifier::new("id", |u: &Unmappable| &u.id))
                .field(Property::new("opaque", |u: &Unmappable| &u.opaque))
        }
    }

    #[derive(Default)]
    struct Unbuildable {
        id: i64,
    }

    impl Mapped for Unbuildable {
        fn schema() -> Schema<Self> {
            Schema::entity().field(Identifier::new("id", |u: &Unbuildable| &u.id))
        }
    }

    #[test]
    fn test_missing_mapper_and_construction_path() {
        match error_of::<Unmappable>() {
            MappingError::NoMapper { field, .. } => assert_eq!(field, "opaque"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            error_of::<Unbuildable>(),
            MappingError::MissingConstructionPath { .. }
        ));
    }
}
