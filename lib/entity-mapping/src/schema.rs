//! Declarative schema description.
//!
//! A domain type describes its mapping by implementing [`Mapped`], usually
//! through `#[derive(Mapped)]`. The typed [`Schema`] builder captures the
//! declaration (entity, projected entity, embeddable, mapped superclass), one
//! definition per mapped field, property overrides, generic parameters,
//! construction paths and lifecycle listeners. The introspector turns it into
//! a validated [`TypeDescriptor`](crate::TypeDescriptor).
//!
//! ```text
//! impl Mapped for Contact {
//!     fn schema() -> Schema<Self> {
//!         Schema::entity()
//!             .kind("Contact")
//!             .instantiate_with(Contact::default)
//!             .field(Identifier::new("id", |c: &Contact| &c.id).writer(|c, v| c.id = v).auto_generated())
//!             .field(Property::new("name", |c: &Contact| &c.name).writer(|c, v| c.name = v))
//!             .field(
//!                 Embedded::new("address", |c: &Contact| c.address.as_ref())
//!                     .writer(|c, v| c.address = Some(v))
//!                     .imploded(),
//!             )
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::access::{
    BaseProjection, ConstructorArgs, DirectCodec, EmbeddedAccessor, FieldAccessor,
    IdentifierCodec, IdentifierValue, PlainAccessor, Projection, WrappedCodec,
};
use crate::listener::{CallbackType, ListenerBinding, ListenerError, TypedListener};
use crate::types::{AnyValue, FieldType, TypeRef, simple_type_name};
use crate::MappingError;

/// A domain type with a mapping schema.
pub trait Mapped: Any + Send + Sync + Sized {
    fn schema() -> Schema<Self>;
}

pub(crate) fn describe<T: Mapped>() -> TypeSchema {
    T::schema().inner
}

/// How a type takes part in mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    /// Root entity; the kind defaults to the type's simple name.
    Entity { kind: Option<String> },
    /// Read-only view of another kind; the kind is mandatory.
    ProjectedEntity { kind: String },
    Embeddable,
    /// Base type whose fields are inherited by derived types.
    MappedSuperclass,
    Plain,
}

/// How an embedded value is laid out in the owning record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestingStrategy {
    /// A single nested-record value under the embedded field's name.
    Imploded,
    /// Flattened into the owner under dotted names.
    #[default]
    Exploded,
}

/// Marker carried by a property with special write semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMarker {
    Version,
    CreatedTimestamp,
    UpdatedTimestamp,
}

/// Name and flags of a mapped property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyOptions {
    pub(crate) name: Option<String>,
    pub(crate) indexed: bool,
    pub(crate) optional: bool,
}

impl Default for PropertyOptions {
    fn default() -> Self {
        Self {
            name: None,
            indexed: true,
            optional: false,
        }
    }
}

impl PropertyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn mapped_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

pub(crate) enum FieldRole {
    Identifier {
        auto_generated: bool,
        codec: Arc<dyn IdentifierCodec>,
    },
    Key,
    ParentKey,
    Embedded {
        describe: fn() -> TypeSchema,
        strategy: NestingStrategy,
        options: PropertyOptions,
    },
    Property {
        options: PropertyOptions,
        marker: Option<FieldMarker>,
    },
}

impl FieldRole {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            FieldRole::Identifier { .. } => "identifier",
            FieldRole::Key => "key",
            FieldRole::ParentKey => "parent key",
            FieldRole::Embedded { .. } => "embedded",
            FieldRole::Property { .. } => "property",
        }
    }
}

pub(crate) struct FieldSpec {
    pub(crate) name: String,
    pub(crate) declared: TypeRef,
    pub(crate) type_param: Option<String>,
    pub(crate) accessor: Arc<dyn FieldAccessor>,
    pub(crate) role: FieldRole,
}

pub(crate) struct BaseSpec {
    pub(crate) describe: fn() -> TypeSchema,
    pub(crate) projection: Arc<dyn Projection>,
}

pub(crate) type Instantiate = Arc<dyn Fn() -> AnyValue + Send + Sync>;

type BuildFn = Arc<dyn Fn(&mut ConstructorArgs) -> Result<AnyValue, MappingError> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct ConstructorSpec {
    pub(crate) params: Vec<Option<String>>,
    pub(crate) build: BuildFn,
}

/// Erased form of a [`Schema`].
pub(crate) struct TypeSchema {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) declaration: Declaration,
    pub(crate) kind_override: Option<String>,
    pub(crate) immutable: bool,
    pub(crate) instantiate: Option<Instantiate>,
    pub(crate) constructors: Vec<ConstructorSpec>,
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) base: Option<BaseSpec>,
    pub(crate) overrides: Vec<(String, PropertyOptions)>,
    pub(crate) type_params: Vec<(String, TypeRef)>,
    pub(crate) listeners: Vec<ListenerBinding>,
}

impl TypeSchema {
    pub(crate) fn simple_name(&self) -> &'static str {
        simple_type_name(self.type_name)
    }
}

/// Typed schema builder for `T`.
pub struct Schema<T> {
    inner: TypeSchema,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Mapped> Schema<T> {
    fn with_declaration(declaration: Declaration) -> Self {
        Self {
            inner: TypeSchema {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                declaration,
                kind_override: None,
                immutable: false,
                instantiate: None,
                constructors: Vec::new(),
                fields: Vec::new(),
                base: None,
                overrides: Vec::new(),
                type_params: Vec::new(),
                listeners: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn entity() -> Self {
        Self::with_declaration(Declaration::Entity { kind: None })
    }

    pub fn projected(kind: impl Into<String>) -> Self {
        Self::with_declaration(Declaration::ProjectedEntity { kind: kind.into() })
    }

    pub fn embeddable() -> Self {
        Self::with_declaration(Declaration::Embeddable)
    }

    pub fn mapped_superclass() -> Self {
        Self::with_declaration(Declaration::MappedSuperclass)
    }

    pub fn plain() -> Self {
        Self::with_declaration(Declaration::Plain)
    }

    /// Set the store kind of an entity or projected entity.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        match &mut self.inner.declaration {
            Declaration::Entity { kind: slot } => *slot = Some(kind),
            Declaration::ProjectedEntity { kind: slot } => *slot = kind,
            _ => {}
        }
        self
    }

    /// Replace the kind of every entity embedding this type.
    pub fn override_kind(mut self, kind: impl Into<String>) -> Self {
        self.inner.kind_override = Some(kind.into());
        self
    }

    /// Mutable construction: a no-argument instance plus field writers.
    pub fn instantiate_with<C>(mut self, instantiate: C) -> Self
    where
        C: Fn() -> T + Send + Sync + 'static,
    {
        self.inner.instantiate = Some(Arc::new(move || Box::new(instantiate()) as AnyValue));
        self
    }

    /// Immutable construction through designated constructors.
    pub fn immutable(mut self) -> Self {
        self.inner.immutable = true;
        self
    }

    pub fn constructor<B>(self, params: &[&str], build: B) -> Self
    where
        B: Fn(&mut ConstructorArgs) -> Result<T, MappingError> + Send + Sync + 'static,
    {
        let params = params.iter().map(|p| Some(*p)).collect();
        self.constructor_with_params(params, build)
    }

    /// Register a constructor whose parameters may lack a name binding.
    pub fn constructor_with_params<B>(mut self, params: Vec<Option<&str>>, build: B) -> Self
    where
        B: Fn(&mut ConstructorArgs) -> Result<T, MappingError> + Send + Sync + 'static,
    {
        self.inner.constructors.push(ConstructorSpec {
            params: params.into_iter().map(|p| p.map(str::to_string)).collect(),
            build: Arc::new(move |args: &mut ConstructorArgs| {
                build(args).map(|value| Box::new(value) as AnyValue)
            }),
        });
        self
    }

    pub fn field(mut self, field: impl IntoField<T>) -> Self {
        self.inner.fields.push(field.into_field().spec);
        self
    }

    /// Inherit the fields and listeners of a mapped-superclass base.
    pub fn inherit<B, G, M>(mut self, get: G, get_mut: M) -> Self
    where
        B: Mapped,
        G: Fn(&T) -> &B + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut B + Send + Sync + 'static,
    {
        self.inner.base = Some(BaseSpec {
            describe: describe::<B>,
            projection: Arc::new(BaseProjection::<T, B>::new(Box::new(get), Box::new(get_mut))),
        });
        self
    }

    /// Override the mapping of an inherited or embedded property, addressed
    /// by its dotted field path.
    pub fn property_override(mut self, path: impl Into<String>, options: PropertyOptions) -> Self {
        self.inner.overrides.push((path.into(), options));
        self
    }

    /// Declare a generic parameter and its bound type.
    pub fn type_parameter<P: Any>(mut self, name: impl Into<String>) -> Self {
        self.inner
            .type_params
            .push((name.into(), TypeRef::scalar::<P>()));
        self
    }

    pub fn listener<H>(mut self, callback: CallbackType, handler: H) -> Self
    where
        H: Fn(&T) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.listeners.push(ListenerBinding {
            callback,
            declared_on: std::any::type_name::<T>(),
            handler: Arc::new(TypedListener::<T>::new(handler)),
        });
        self
    }
}

/// A finished field definition.
pub struct FieldDefinition {
    spec: FieldSpec,
}

/// Conversion of a typed field definition for owner `T`.
pub trait IntoField<T> {
    fn into_field(self) -> FieldDefinition;
}

type Getter<T, F> = Box<dyn Fn(&T) -> &F + Send + Sync>;
type Setter<T, F> = Box<dyn Fn(&mut T, F) + Send + Sync>;

/// Identifier field definition.
pub struct Identifier<T, F> {
    name: String,
    get: Getter<T, F>,
    set: Option<Setter<T, F>>,
    codec: Arc<dyn IdentifierCodec>,
    auto_generated: bool,
}

impl<T: Mapped, F: IdentifierValue> Identifier<T, F> {
    pub fn new<G>(name: impl Into<String>, get: G) -> Self
    where
        G: Fn(&T) -> &F + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            get: Box::new(get),
            set: None,
            codec: Arc::new(DirectCodec::<F>::new()),
            auto_generated: false,
        }
    }
}

impl<T: Mapped, W: FieldType> Identifier<T, W> {
    /// Identifier held in a wrapper type, built from the raw id through `wrap`.
    pub fn wrapped<P, G, U, R>(name: impl Into<String>, get: G, unwrap: U, wrap: R) -> Self
    where
        P: IdentifierValue,
        G: Fn(&T) -> &W + Send + Sync + 'static,
        U: Fn(&W) -> &P + Send + Sync + 'static,
        R: Fn(P) -> W + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            get: Box::new(get),
            set: None,
            codec: Arc::new(WrappedCodec::<W, P>::new(Box::new(unwrap), Box::new(wrap))),
            auto_generated: false,
        }
    }

    pub fn writer<S>(mut self, set: S) -> Self
    where
        S: Fn(&mut T, W) + Send + Sync + 'static,
    {
        self.set = Some(Box::new(set));
        self
    }

    /// Let the store allocate the id when the field is unset on insert.
    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self
    }
}

impl<T: Mapped, F: FieldType> IntoField<T> for Identifier<T, F> {
    fn into_field(self) -> FieldDefinition {
        FieldDefinition {
            spec: FieldSpec {
                name: self.name.clone(),
                declared: F::type_ref(),
                type_param: None,
                accessor: Arc::new(PlainAccessor::new(self.name, self.get, self.set)),
                role: FieldRole::Identifier {
                    auto_generated: self.auto_generated,
                    codec: self.codec,
                },
            },
        }
    }
}

/// Field holding the record key, or the key of the parent record.
///
/// The declared type must be `Option<Key>`.
pub struct KeyField<T, F> {
    name: String,
    parent: bool,
    get: Getter<T, F>,
    set: Option<Setter<T, F>>,
}

impl<T: Mapped, F: FieldType> KeyField<T, F> {
    pub fn key<G>(name: impl Into<String>, get: G) -> Self
    where
        G: Fn(&T) -> &F + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parent: false,
            get: Box::new(get),
            set: None,
        }
    }

    pub fn parent<G>(name: impl Into<String>, get: G) -> Self
    where
        G: Fn(&T) -> &F + Send + Sync + 'static,
    {
        Self {
            parent: true,
            ..Self::key(name, get)
        }
    }

    pub fn writer<S>(mut self, set: S) -> Self
    where
        S: Fn(&mut T, F) + Send + Sync + 'static,
    {
        self.set = Some(Box::new(set));
        self
    }
}

impl<T: Mapped, F: FieldType> IntoField<T> for KeyField<T, F> {
    fn into_field(self) -> FieldDefinition {
        FieldDefinition {
            spec: FieldSpec {
                name: self.name.clone(),
                declared: F::type_ref(),
                type_param: None,
                accessor: Arc::new(PlainAccessor::new(self.name, self.get, self.set)),
                role: if self.parent {
                    FieldRole::ParentKey
                } else {
                    FieldRole::Key
                },
            },
        }
    }
}

/// Plain property field definition.
pub struct Property<T, F> {
    name: String,
    get: Getter<T, F>,
    set: Option<Setter<T, F>>,
    options: PropertyOptions,
    marker: Option<FieldMarker>,
    type_param: Option<String>,
}

impl<T: Mapped, F: FieldType> Property<T, F> {
    pub fn new<G>(name: impl Into<String>, get: G) -> Self
    where
        G: Fn(&T) -> &F + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            get: Box::new(get),
            set: None,
            options: PropertyOptions::default(),
            marker: None,
            type_param: None,
        }
    }

    pub fn writer<S>(mut self, set: S) -> Self
    where
        S: Fn(&mut T, F) + Send + Sync + 'static,
    {
        self.set = Some(Box::new(set));
        self
    }

    pub fn mapped_name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn indexed(mut self, indexed: bool) -> Self {
        self.options.indexed = indexed;
        self
    }

    /// Omit the property from records when its value is null.
    pub fn optional(mut self, optional: bool) -> Self {
        self.options.optional = optional;
        self
    }

    pub fn options(mut self, options: PropertyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn version(mut self) -> Self {
        self.marker = Some(FieldMarker::Version);
        self
    }

    pub fn created_timestamp(mut self) -> Self {
        self.marker = Some(FieldMarker::CreatedTimestamp);
        self
    }

    pub fn updated_timestamp(mut self) -> Self {
        self.marker = Some(FieldMarker::UpdatedTimestamp);
        self
    }

    /// Declare the field's type as the named generic parameter.
    pub fn generic(mut self, parameter: impl Into<String>) -> Self {
        self.type_param = Some(parameter.into());
        self
    }
}

impl<T: Mapped, F: FieldType> IntoField<T> for Property<T, F> {
    fn into_field(self) -> FieldDefinition {
        FieldDefinition {
            spec: FieldSpec {
                name: self.name.clone(),
                declared: F::type_ref(),
                type_param: self.type_param,
                accessor: Arc::new(PlainAccessor::new(self.name, self.get, self.set)),
                role: FieldRole::Property {
                    options: self.options,
                    marker: self.marker,
                },
            },
        }
    }
}

/// Embedded field definition; the getter returns `None` for a null value.
pub struct Embedded<T, E> {
    name: String,
    get: Box<dyn Fn(&T) -> Option<&E> + Send + Sync>,
    set: Option<Setter<T, E>>,
    strategy: NestingStrategy,
    options: PropertyOptions,
    type_param: Option<String>,
}

impl<T: Mapped, E: Mapped> Embedded<T, E> {
    pub fn new<G>(name: impl Into<String>, get: G) -> Self
    where
        G: Fn(&T) -> Option<&E> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            get: Box::new(get),
            set: None,
            strategy: NestingStrategy::default(),
            options: PropertyOptions::default(),
            type_param: None,
        }
    }

    pub fn writer<S>(mut self, set: S) -> Self
    where
        S: Fn(&mut T, E) + Send + Sync + 'static,
    {
        self.set = Some(Box::new(set));
        self
    }

    pub fn imploded(mut self) -> Self {
        self.strategy = NestingStrategy::Imploded;
        self
    }

    pub fn exploded(mut self) -> Self {
        self.strategy = NestingStrategy::Exploded;
        self
    }

    pub fn strategy(mut self, strategy: NestingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn mapped_name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn indexed(mut self, indexed: bool) -> Self {
        self.options.indexed = indexed;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.options.optional = optional;
        self
    }

    pub fn generic(mut self, parameter: impl Into<String>) -> Self {
        self.type_param = Some(parameter.into());
        self
    }
}

impl<T: Mapped, E: Mapped> IntoField<T> for Embedded<T, E> {
    fn into_field(self) -> FieldDefinition {
        FieldDefinition {
            spec: FieldSpec {
                name: self.name.clone(),
                declared: TypeRef::scalar::<E>(),
                type_param: self.type_param,
                accessor: Arc::new(EmbeddedAccessor::new(self.name, self.get, self.set)),
                role: FieldRole::Embedded {
                    describe: describe::<E>,
                    strategy: self.strategy,
                    options: self.options,
                },
            },
        }
    }
}
