//! Field accessor capabilities.
//!
//! Every mapped field is reached through a [`FieldAccessor`] built once from
//! the typed getter/writer closures of its schema, so marshalling and
//! unmarshalling work on erased values without any runtime reflection.
//! Fields inherited from a mapped superclass are reached through a
//! [`Projection`] from the derived value to its base.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::types::AnyValue;
use crate::{ConversionError, KeyId, MappingError};

pub(crate) trait FieldAccessor: Send + Sync {
    /// Read the field; `None` means a null embedded value.
    fn get<'a>(&self, target: &'a dyn Any) -> Result<Option<&'a dyn Any>, MappingError>;

    fn set(&self, target: &mut dyn Any, value: AnyValue) -> Result<(), MappingError>;
}

type Getter<T, F> = Box<dyn Fn(&T) -> &F + Send + Sync>;
type OptionalGetter<T, F> = Box<dyn Fn(&T) -> Option<&F> + Send + Sync>;
type Setter<T, F> = Box<dyn Fn(&mut T, F) + Send + Sync>;

fn downcast<T: Any>(target: &dyn Any) -> Result<&T, MappingError> {
    target
        .downcast_ref::<T>()
        .ok_or(MappingError::TargetMismatch {
            expected: std::any::type_name::<T>(),
        })
}

fn downcast_mut<T: Any>(target: &mut dyn Any) -> Result<&mut T, MappingError> {
    target
        .downcast_mut::<T>()
        .ok_or(MappingError::TargetMismatch {
            expected: std::any::type_name::<T>(),
        })
}

fn unbox<F: Any>(value: AnyValue) -> Result<F, MappingError> {
    value
        .downcast::<F>()
        .map(|v| *v)
        .map_err(|_| MappingError::TargetMismatch {
            expected: std::any::type_name::<F>(),
        })
}

pub(crate) struct PlainAccessor<T, F> {
    owner: &'static str,
    field: String,
    get: Getter<T, F>,
    set: Option<Setter<T, F>>,
}

impl<T: Any, F: Any> PlainAccessor<T, F> {
    pub(crate) fn new(field: String, get: Getter<T, F>, set: Option<Setter<T, F>>) -> Self {
        Self {
            owner: std::any::type_name::<T>(),
            field,
            get,
            set,
        }
    }
}

impl<T: Any, F: Any + Send> FieldAccessor for PlainAccessor<T, F> {
    fn get<'a>(&self, target: &'a dyn Any) -> Result<Option<&'a dyn Any>, MappingError> {
        let target = downcast::<T>(target)?;
        Ok(Some((self.get)(target) as &dyn Any))
    }

    fn set(&self, target: &mut dyn Any, value: AnyValue) -> Result<(), MappingError> {
        let setter = self.set.as_ref().ok_or_else(|| MappingError::ReadOnlyField {
            type_name: self.owner,
            field: self.field.clone(),
        })?;
        let target = downcast_mut::<T>(target)?;
        setter(target, unbox::<F>(value)?);
        Ok(())
    }
}

pub(crate) struct EmbeddedAccessor<T, E> {
    owner: &'static str,
    field: String,
    get: OptionalGetter<T, E>,
    set: Option<Setter<T, E>>,
}

impl<T: Any, E: Any> EmbeddedAccessor<T, E> {
    pub(crate) fn new(
        field: String,
        get: OptionalGetter<T, E>,
        set: Option<Setter<T, E>>,
    ) -> Self {
        Self {
            owner: std::any::type_name::<T>(),
            field,
            get,
            set,
        }
    }
}

impl<T: Any, E: Any + Send> FieldAccessor for EmbeddedAccessor<T, E> {
    fn get<'a>(&self, target: &'a dyn Any) -> Result<Option<&'a dyn Any>, MappingError> {
        let target = downcast::<T>(target)?;
        Ok((self.get)(target).map(|value| value as &dyn Any))
    }

    fn set(&self, target: &mut dyn Any, value: AnyValue) -> Result<(), MappingError> {
        let setter = self.set.as_ref().ok_or_else(|| MappingError::ReadOnlyField {
            type_name: self.owner,
            field: self.field.clone(),
        })?;
        let target = downcast_mut::<T>(target)?;
        setter(target, unbox::<E>(value)?);
        Ok(())
    }
}

/// Path from a derived value to the part of it declared by a base type.
pub(crate) trait Projection: Send + Sync {
    fn project<'a>(&self, target: &'a dyn Any) -> Result<&'a dyn Any, MappingError>;

    fn project_mut<'a>(&self, target: &'a mut dyn Any) -> Result<&'a mut dyn Any, MappingError>;
}

pub(crate) struct BaseProjection<T, B> {
    get: Getter<T, B>,
    get_mut: Box<dyn Fn(&mut T) -> &mut B + Send + Sync>,
}

impl<T, B> BaseProjection<T, B> {
    pub(crate) fn new(
        get: Getter<T, B>,
        get_mut: Box<dyn Fn(&mut T) -> &mut B + Send + Sync>,
    ) -> Self {
        Self { get, get_mut }
    }
}

impl<T: Any, B: Any> Projection for BaseProjection<T, B> {
    fn project<'a>(&self, target: &'a dyn Any) -> Result<&'a dyn Any, MappingError> {
        let target = downcast::<T>(target)?;
        Ok((self.get)(target))
    }

    fn project_mut<'a>(&self, target: &'a mut dyn Any) -> Result<&'a mut dyn Any, MappingError> {
        let target = downcast_mut::<T>(target)?;
        Ok((self.get_mut)(target))
    }
}

/// Accessor for a field declared on a base type.
pub(crate) struct ProjectedAccessor {
    pub(crate) projection: Arc<dyn Projection>,
    pub(crate) inner: Arc<dyn FieldAccessor>,
}

impl FieldAccessor for ProjectedAccessor {
    fn get<'a>(&self, target: &'a dyn Any) -> Result<Option<&'a dyn Any>, MappingError> {
        self.inner.get(self.projection.project(target)?)
    }

    fn set(&self, target: &mut dyn Any, value: AnyValue) -> Result<(), MappingError> {
        self.inner.set(self.projection.project_mut(target)?, value)
    }
}

/// Identifier value type: numeric or named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Long,
    Name,
}

/// A type usable directly as an identifier field.
///
/// A zero `i64` and an empty `String` count as unset, as does `None`.
pub trait IdentifierValue: crate::FieldType {
    const ID_TYPE: IdType;

    fn key_id(&self) -> Option<KeyId>;

    fn from_key_id(id: &KeyId) -> Result<Self, ConversionError>;
}

impl IdentifierValue for i64 {
    const ID_TYPE: IdType = IdType::Long;

    fn key_id(&self) -> Option<KeyId> {
        (*self != 0).then_some(KeyId::Id(*self))
    }

    fn from_key_id(id: &KeyId) -> Result<Self, ConversionError> {
        match id {
            KeyId::Id(id) => Ok(*id),
            KeyId::Name(name) => Err(ConversionError::new(format!(
                "expected a numeric id, found name \"{}\"",
                name
            ))),
        }
    }
}

impl IdentifierValue for String {
    const ID_TYPE: IdType = IdType::Name;

    fn key_id(&self) -> Option<KeyId> {
        (!self.is_empty()).then(|| KeyId::Name(self.clone()))
    }

    // Names allocated by a store arrive as numeric ids.
    fn from_key_id(id: &KeyId) -> Result<Self, ConversionError> {
        match id {
            KeyId::Name(name) => Ok(name.clone()),
            KeyId::Id(id) => Ok(id.to_string()),
        }
    }
}

impl<P: IdentifierValue> IdentifierValue for Option<P> {
    const ID_TYPE: IdType = P::ID_TYPE;

    fn key_id(&self) -> Option<KeyId> {
        self.as_ref().and_then(P::key_id)
    }

    fn from_key_id(id: &KeyId) -> Result<Self, ConversionError> {
        P::from_key_id(id).map(Some)
    }
}

/// Converts between an identifier field's value and a key id.
pub(crate) trait IdentifierCodec: Send + Sync {
    fn id_type(&self) -> IdType;

    fn is_wrapped(&self) -> bool;

    fn key_id(&self, value: &dyn Any) -> Result<Option<KeyId>, ConversionError>;

    fn from_key_id(&self, id: &KeyId) -> Result<AnyValue, ConversionError>;
}

pub(crate) struct DirectCodec<F>(PhantomData<fn() -> F>);

impl<F> DirectCodec<F> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<F: IdentifierValue> IdentifierCodec for DirectCodec<F> {
    fn id_type(&self) -> IdType {
        F::ID_TYPE
    }

    fn is_wrapped(&self) -> bool {
        false
    }

    fn key_id(&self, value: &dyn Any) -> Result<Option<KeyId>, ConversionError> {
        value
            .downcast_ref::<F>()
            .map(F::key_id)
            .ok_or_else(|| ConversionError::type_mismatch(std::any::type_name::<F>()))
    }

    fn from_key_id(&self, id: &KeyId) -> Result<AnyValue, ConversionError> {
        F::from_key_id(id).map(|value| Box::new(value) as AnyValue)
    }
}

/// Identifier held in a wrapper type built from the raw id.
pub(crate) struct WrappedCodec<W, P> {
    unwrap: Getter<W, P>,
    wrap: Box<dyn Fn(P) -> W + Send + Sync>,
}

impl<W, P> WrappedCodec<W, P> {
    pub(crate) fn new(unwrap: Getter<W, P>, wrap: Box<dyn Fn(P) -> W + Send + Sync>) -> Self {
        Self { unwrap, wrap }
    }
}

impl<W: Any + Send, P: IdentifierValue> IdentifierCodec for WrappedCodec<W, P> {
    fn id_type(&self) -> IdType {
        P::ID_TYPE
    }

    fn is_wrapped(&self) -> bool {
        true
    }

    fn key_id(&self, value: &dyn Any) -> Result<Option<KeyId>, ConversionError> {
        value
            .downcast_ref::<W>()
            .map(|wrapper| (self.unwrap)(wrapper).key_id())
            .ok_or_else(|| ConversionError::type_mismatch(std::any::type_name::<W>()))
    }

    fn from_key_id(&self, id: &KeyId) -> Result<AnyValue, ConversionError> {
        let raw = P::from_key_id(id)?;
        Ok(Box::new((self.wrap)(raw)))
    }
}

enum Argument {
    Value(AnyValue),
    Embedded(Option<AnyValue>),
}

/// Named values handed to a designated constructor of an immutable type.
pub struct ConstructorArgs {
    type_name: &'static str,
    values: HashMap<String, Argument>,
}

impl ConstructorArgs {
    pub(crate) fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            values: HashMap::new(),
        }
    }

    pub(crate) fn insert_value(&mut self, name: String, value: AnyValue) {
        self.values.insert(name, Argument::Value(value));
    }

    pub(crate) fn insert_embedded(&mut self, name: String, value: Option<AnyValue>) {
        self.values.insert(name, Argument::Embedded(value));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn missing(&self, name: &str) -> MappingError {
        MappingError::ConstructorArgument {
            type_name: self.type_name,
            name: name.to_string(),
        }
    }

    /// Take a property, identifier or key argument.
    pub fn take<F: Any>(&mut self, name: &str) -> Result<F, MappingError> {
        match self.values.remove(name) {
            Some(Argument::Value(value)) => value
                .downcast::<F>()
                .map(|v| *v)
                .map_err(|_| self.missing(name)),
            _ => Err(self.missing(name)),
        }
    }

    /// Take an embedded argument; `None` when the stored value was null.
    pub fn take_embedded<E: Any>(&mut self, name: &str) -> Result<Option<E>, MappingError> {
        match self.values.remove(name) {
            Some(Argument::Embedded(None)) => Ok(None),
            Some(Argument::Embedded(Some(value))) => value
                .downcast::<E>()
                .map(|v| Some(*v))
                .map_err(|_| self.missing(name)),
            _ => Err(self.missing(name)),
        }
    }

    /// Take an embedded argument that must not be null.
    pub fn require_embedded<E: Any>(&mut self, name: &str) -> Result<E, MappingError> {
        self.take_embedded(name)?.ok_or_else(|| self.missing(name))
    }
}
