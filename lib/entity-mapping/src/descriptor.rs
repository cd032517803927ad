//! Structural descriptors produced by the introspector.
//!
//! Descriptors are immutable once built and shared through `Arc`. An
//! [`EmbeddedDescriptor`] describes one embedding *site*: it carries the
//! names resolved for that site (prefixes and overrides applied) while the
//! nested [`TypeDescriptor`] is shared by every site embedding the same type.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::access::{FieldAccessor, IdType, IdentifierCodec};
use crate::listener::ListenerBinding;
use crate::schema::{
    ConstructorSpec, Declaration, FieldMarker, Instantiate, NestingStrategy, PropertyOptions,
};
use crate::mapper::ValueMapper;
use crate::types::TypeRef;

#[derive(Clone)]
pub struct IdentifierDescriptor {
    pub(crate) field_name: String,
    pub(crate) declared: TypeRef,
    pub(crate) auto_generated: bool,
    pub(crate) codec: Arc<dyn IdentifierCodec>,
    pub(crate) accessor: Arc<dyn FieldAccessor>,
}

impl IdentifierDescriptor {
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn declared_type(&self) -> &TypeRef {
        &self.declared
    }

    pub fn is_auto_generated(&self) -> bool {
        self.auto_generated
    }

    pub fn id_type(&self) -> IdType {
        self.codec.id_type()
    }

    /// Whether the id is held in a wrapper type.
    pub fn is_wrapped(&self) -> bool {
        self.codec.is_wrapped()
    }
}

#[derive(Clone)]
pub struct KeyDescriptor {
    pub(crate) field_name: String,
    pub(crate) accessor: Arc<dyn FieldAccessor>,
}

impl KeyDescriptor {
    pub fn field_name(&self) -> &str {
        &self.field_name
    }
}

#[derive(Clone)]
pub struct PropertyDescriptor {
    pub(crate) field_name: String,
    pub(crate) mapped_name: String,
    pub(crate) declared: TypeRef,
    pub(crate) indexed: bool,
    pub(crate) optional: bool,
    pub(crate) marker: Option<FieldMarker>,
    pub(crate) mapper: Arc<dyn ValueMapper>,
    pub(crate) accessor: Arc<dyn FieldAccessor>,
}

impl PropertyDescriptor {
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn mapped_name(&self) -> &str {
        &self.mapped_name
    }

    pub fn declared_type(&self) -> &TypeRef {
        &self.declared
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn marker(&self) -> Option<FieldMarker> {
        self.marker
    }

    pub(crate) fn apply(&mut self, mapped_name: String, options: &PropertyOptions) {
        self.mapped_name = mapped_name;
        self.indexed = options.indexed;
        self.optional = options.optional;
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("field_name", &self.field_name)
            .field("mapped_name", &self.mapped_name)
            .field("declared", &self.declared)
            .field("indexed", &self.indexed)
            .field("optional", &self.optional)
            .field("marker", &self.marker)
            .finish()
    }
}

#[derive(Clone)]
pub struct EmbeddedDescriptor {
    pub(crate) field_name: String,
    pub(crate) path: String,
    pub(crate) mapped_name: String,
    pub(crate) strategy: NestingStrategy,
    pub(crate) indexed: bool,
    pub(crate) optional: bool,
    /// Options as declared on the field, before prefixes and overrides.
    pub(crate) options: PropertyOptions,
    pub(crate) accessor: Arc<dyn FieldAccessor>,
    pub(crate) descriptor: Arc<TypeDescriptor>,
    pub(crate) properties: Vec<PropertyDescriptor>,
    pub(crate) embedded: Vec<EmbeddedDescriptor>,
}

impl EmbeddedDescriptor {
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Dotted field path from the owning entity.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mapped_name(&self) -> &str {
        &self.mapped_name
    }

    pub fn strategy(&self) -> NestingStrategy {
        self.strategy
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn type_descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn embedded(&self) -> &[EmbeddedDescriptor] {
        &self.embedded
    }

    pub fn property(&self, mapped_name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.mapped_name == mapped_name)
    }
}

impl fmt::Debug for EmbeddedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedDescriptor")
            .field("path", &self.path)
            .field("mapped_name", &self.mapped_name)
            .field("strategy", &self.strategy)
            .field("type", &self.descriptor.type_name)
            .field("properties", &self.properties)
            .field("embedded", &self.embedded)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) enum Construction {
    Mutable(Instantiate),
    Immutable(Vec<ConstructorSpec>),
}

/// Validated structure of one mapped type.
pub struct TypeDescriptor {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) kind: String,
    pub(crate) declaration: Declaration,
    pub(crate) kind_override: Option<String>,
    pub(crate) identifier: Option<IdentifierDescriptor>,
    pub(crate) key: Option<KeyDescriptor>,
    pub(crate) parent_key: Option<KeyDescriptor>,
    pub(crate) properties: IndexMap<String, Arc<PropertyDescriptor>>,
    pub(crate) embedded: Vec<EmbeddedDescriptor>,
    pub(crate) version: Option<Arc<PropertyDescriptor>>,
    pub(crate) created_timestamp: Option<Arc<PropertyDescriptor>>,
    pub(crate) updated_timestamp: Option<Arc<PropertyDescriptor>>,
    pub(crate) construction: Construction,
    pub(crate) overrides: IndexMap<String, PropertyOptions>,
    pub(crate) generic_bindings: Vec<(String, TypeRef)>,
    pub(crate) listeners: Vec<ListenerBinding>,
}

impl TypeDescriptor {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    pub fn is_projected(&self) -> bool {
        matches!(self.declaration, Declaration::ProjectedEntity { .. })
    }

    pub fn is_immutable(&self) -> bool {
        matches!(self.construction, Construction::Immutable(_))
    }

    pub fn identifier(&self) -> Option<&IdentifierDescriptor> {
        self.identifier.as_ref()
    }

    pub fn key(&self) -> Option<&KeyDescriptor> {
        self.key.as_ref()
    }

    pub fn parent_key(&self) -> Option<&KeyDescriptor> {
        self.parent_key.as_ref()
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values().map(|p| p.as_ref())
    }

    pub fn property(&self, mapped_name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(mapped_name).map(|p| p.as_ref())
    }

    pub fn embedded(&self) -> &[EmbeddedDescriptor] {
        &self.embedded
    }

    pub fn version(&self) -> Option<&PropertyDescriptor> {
        self.version.as_deref()
    }

    pub fn created_timestamp(&self) -> Option<&PropertyDescriptor> {
        self.created_timestamp.as_deref()
    }

    pub fn updated_timestamp(&self) -> Option<&PropertyDescriptor> {
        self.updated_timestamp.as_deref()
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&str, &PropertyOptions)> {
        self.overrides.iter().map(|(path, options)| (path.as_str(), options))
    }

    pub fn generic_bindings(&self) -> impl Iterator<Item = (&str, &TypeRef)> {
        self.generic_bindings
            .iter()
            .map(|(name, type_ref)| (name.as_str(), type_ref))
    }

    pub fn listeners(&self) -> &[ListenerBinding] {
        &self.listeners
    }

    /// Every mapped name written to the top-level record, in write order.
    pub fn record_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.properties.keys().map(String::as_str).collect();
        for site in &self.embedded {
            collect_site_names(site, &mut names);
        }
        names
    }
}

/// Names a site contributes to the namespace of the record that holds it.
pub(crate) fn collect_site_names<'a>(site: &'a EmbeddedDescriptor, names: &mut Vec<&'a str>) {
    match site.strategy {
        NestingStrategy::Imploded => names.push(&site.mapped_name),
        NestingStrategy::Exploded => {
            names.extend(site.properties.iter().map(|p| p.mapped_name.as_str()));
            for child in &site.embedded {
                collect_site_names(child, names);
            }
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("declaration", &self.declaration)
            .field(
                "identifier",
                &self.identifier.as_ref().map(|id| id.field_name.as_str()),
            )
            .field("properties", &self.properties)
            .field("embedded", &self.embedded)
            .field("immutable", &self.is_immutable())
            .field("listeners", &self.listeners)
            .finish()
    }
}
