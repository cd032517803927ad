//! Declared-type references.
//!
//! A [`TypeRef`] identifies the declared type of a field (by `TypeId`) and
//! records its structural shape, so the mapper registry can fall back to a
//! generic `Option<_>` or `Vec<_>` mapper around a registered element mapper.
//! A [`TypeReference`] names a mapped type for introspection, optionally with
//! the concrete arguments bound to its generic parameters.

use std::any::{Any, TypeId};
use std::fmt;
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use crate::schema::{Mapped, TypeSchema, describe};
use crate::{Blob, Key, Record, StorageDatetime};

/// Type-erased, owned domain value.
pub type AnyValue = Box<dyn Any + Send>;

/// Projects an `Option<T>` and rebuilds one from an erased inner value.
#[derive(Clone, Copy)]
pub struct OptionAdapter {
    pub(crate) project: for<'a> fn(&'a dyn Any) -> Option<Option<&'a dyn Any>>,
    pub(crate) inject: fn(Option<AnyValue>) -> Option<AnyValue>,
}

/// Iterates a `Vec<T>` and rebuilds one from erased elements.
#[derive(Clone, Copy)]
pub struct ListAdapter {
    pub(crate) elements: for<'a> fn(&'a dyn Any) -> Option<Vec<&'a dyn Any>>,
    pub(crate) collect: fn(Vec<AnyValue>) -> Option<AnyValue>,
}

#[derive(Clone)]
pub enum TypeShape {
    Scalar,
    Optional(Box<TypeRef>, OptionAdapter),
    List(Box<TypeRef>, ListAdapter),
}

/// Reference to the declared type of a field.
#[derive(Clone)]
pub struct TypeRef {
    id: TypeId,
    name: &'static str,
    shape: TypeShape,
}

impl TypeRef {
    pub fn scalar<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            shape: TypeShape::Scalar,
        }
    }

    pub fn of<T: FieldType>() -> Self {
        T::type_ref()
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shape(&self) -> &TypeShape {
        &self.shape
    }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeRef {}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A type that can be declared as a mapped field.
pub trait FieldType: Any + Send + Sync + Sized {
    fn type_ref() -> TypeRef {
        TypeRef::scalar::<Self>()
    }
}

macro_rules! scalar_field_types {
    ($($ty:ty),* $(,)?) => {
        $(impl FieldType for $ty {})*
    };
}

scalar_field_types!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    char,
    String,
    Blob,
    Record,
    Key,
    StorageDatetime,
    DateTime<Utc>,
    DateTime<FixedOffset>,
    NaiveDateTime,
    SystemTime,
);

impl<T: FieldType> FieldType for Option<T> {
    fn type_ref() -> TypeRef {
        TypeRef {
            id: TypeId::of::<Self>(),
            name: std::any::type_name::<Self>(),
            shape: TypeShape::Optional(
                Box::new(T::type_ref()),
                OptionAdapter {
                    project: project_option::<T>,
                    inject: inject_option::<T>,
                },
            ),
        }
    }
}

impl<T: FieldType> FieldType for Vec<T> {
    fn type_ref() -> TypeRef {
        TypeRef {
            id: TypeId::of::<Self>(),
            name: std::any::type_name::<Self>(),
            shape: TypeShape::List(
                Box::new(T::type_ref()),
                ListAdapter {
                    elements: list_elements::<T>,
                    collect: collect_list::<T>,
                },
            ),
        }
    }
}

fn project_option<T: Any>(value: &dyn Any) -> Option<Option<&dyn Any>> {
    value
        .downcast_ref::<Option<T>>()
        .map(|inner| inner.as_ref().map(|v| v as &dyn Any))
}

fn inject_option<T: Any + Send>(value: Option<AnyValue>) -> Option<AnyValue> {
    match value {
        None => Some(Box::new(None::<T>)),
        Some(boxed) => boxed
            .downcast::<T>()
            .ok()
            .map(|v| Box::new(Some(*v)) as AnyValue),
    }
}

fn list_elements<T: Any>(value: &dyn Any) -> Option<Vec<&dyn Any>> {
    value
        .downcast_ref::<Vec<T>>()
        .map(|items| items.iter().map(|v| v as &dyn Any).collect())
}

fn collect_list<T: Any + Send>(values: Vec<AnyValue>) -> Option<AnyValue> {
    let mut items = Vec::with_capacity(values.len());
    for value in values {
        items.push(*value.downcast::<T>().ok()?);
    }
    Some(Box::new(items))
}

/// Strip module path and generic arguments from a type name.
pub(crate) fn simple_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Names a mapped type for introspection.
///
/// Only two forms exist: a concrete type, or a parameterized instantiation
/// carrying one argument per declared generic parameter.
#[derive(Clone)]
pub struct TypeReference {
    type_id: TypeId,
    type_name: &'static str,
    arguments: Option<Vec<TypeRef>>,
    describe: fn() -> TypeSchema,
}

impl TypeReference {
    pub fn of<T: Mapped>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            arguments: None,
            describe: describe::<T>,
        }
    }

    pub fn parameterized<T: Mapped>(arguments: Vec<TypeRef>) -> Self {
        Self {
            arguments: Some(arguments),
            ..Self::of::<T>()
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn arguments(&self) -> Option<&[TypeRef]> {
        self.arguments.as_deref()
    }

    pub(crate) fn describe(&self) -> TypeSchema {
        (self.describe)()
    }
}

impl fmt::Debug for TypeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeReference")
            .field("type_name", &self.type_name)
            .field("arguments", &self.arguments)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_type_name() {
        assert_eq!(simple_type_name("app::model::Contact"), "Contact");
        assert_eq!(
            simple_type_name("app::model::Wrapper<app::model::Address, alloc::string::String>"),
            "Wrapper"
        );
        assert_eq!(simple_type_name("Contact"), "Contact");
    }

    #[test]
    fn test_option_shape_projects_inner_value() {
        let type_ref = TypeRef::of::<Option<i64>>();
        let TypeShape::Optional(inner, adapter) = type_ref.shape() else {
            panic!("expected an optional shape");
        };
        assert!(inner.is::<i64>());

        let present: Option<i64> = Some(5);
        let projected = (adapter.project)(&present).unwrap().unwrap();
        assert_eq!(projected.downcast_ref::<i64>(), Some(&5));

        let rebuilt = (adapter.inject)(None).unwrap();
        assert_eq!(rebuilt.downcast_ref::<Option<i64>>(), Some(&None));
    }

    #[test]
    fn test_list_shape_collects_elements() {
        let type_ref = TypeRef::of::<Vec<String>>();
        let TypeShape::List(_, adapter) = type_ref.shape() else {
            panic!("expected a list shape");
        };
        let values: Vec<AnyValue> = vec![Box::new("a".to_string()), Box::new("b".to_string())];
        let rebuilt = (adapter.collect)(values).unwrap();
        assert_eq!(
            rebuilt.downcast_ref::<Vec<String>>(),
            Some(&vec!["a".to_string(), "b".to_string()])
        );

        let wrong: Vec<AnyValue> = vec![Box::new(1i64)];
        assert!((adapter.collect)(wrong).is_none());
    }
}
