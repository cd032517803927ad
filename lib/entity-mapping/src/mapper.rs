//! Value mappers and the registry that resolves them by declared type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use parking_lot::RwLock;

use crate::types::{AnyValue, FieldType, ListAdapter, OptionAdapter, TypeRef, TypeShape};
use crate::{Blob, ConversionError, Record, StorageDatetime, Value};

/// Converts one domain value to and from its store form.
pub trait ValueMapper: Send + Sync {
    fn to_datastore(&self, value: &dyn Any) -> Result<Value, ConversionError>;

    fn to_model(&self, value: &Value) -> Result<AnyValue, ConversionError>;
}

/// Typed convenience form of [`ValueMapper`].
pub trait TypedMapper: Send + Sync {
    type Model: Any + Send;

    fn to_value(&self, model: &Self::Model) -> Result<Value, ConversionError>;

    fn from_value(&self, value: &Value) -> Result<Self::Model, ConversionError>;
}

impl<M: TypedMapper> ValueMapper for M {
    fn to_datastore(&self, value: &dyn Any) -> Result<Value, ConversionError> {
        let model = value
            .downcast_ref::<M::Model>()
            .ok_or_else(|| ConversionError::type_mismatch(std::any::type_name::<M::Model>()))?;
        self.to_value(model)
    }

    fn to_model(&self, value: &Value) -> Result<AnyValue, ConversionError> {
        self.from_value(value).map(|model| Box::new(model) as AnyValue)
    }
}

pub struct BooleanMapper;

impl TypedMapper for BooleanMapper {
    type Model = bool;

    fn to_value(&self, model: &bool) -> Result<Value, ConversionError> {
        Ok(Value::Boolean(*model))
    }

    fn from_value(&self, value: &Value) -> Result<bool, ConversionError> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(ConversionError::unexpected("boolean", other)),
        }
    }
}

/// Integral types stored as a long.
pub struct IntegerMapper<N>(PhantomData<fn() -> N>);

impl<N> IntegerMapper<N> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<N> Default for IntegerMapper<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> TypedMapper for IntegerMapper<N>
where
    N: Any + Send + Copy + Into<i64> + TryFrom<i64>,
{
    type Model = N;

    fn to_value(&self, model: &N) -> Result<Value, ConversionError> {
        Ok(Value::Long((*model).into()))
    }

    fn from_value(&self, value: &Value) -> Result<N, ConversionError> {
        match value {
            Value::Long(n) => N::try_from(*n).map_err(|_| {
                ConversionError::new(format!(
                    "{} is out of range for {}",
                    n,
                    std::any::type_name::<N>()
                ))
            }),
            other => Err(ConversionError::unexpected("long", other)),
        }
    }
}

pub struct DoubleMapper;

impl TypedMapper for DoubleMapper {
    type Model = f64;

    fn to_value(&self, model: &f64) -> Result<Value, ConversionError> {
        Ok(Value::Double(*model))
    }

    fn from_value(&self, value: &Value) -> Result<f64, ConversionError> {
        match value {
            Value::Double(n) => Ok(*n),
            Value::Long(n) => Ok(*n as f64),
            other => Err(ConversionError::unexpected("double", other)),
        }
    }
}

pub struct FloatMapper;

impl TypedMapper for FloatMapper {
    type Model = f32;

    fn to_value(&self, model: &f32) -> Result<Value, ConversionError> {
        Ok(Value::Double(f64::from(*model)))
    }

    fn from_value(&self, value: &Value) -> Result<f32, ConversionError> {
        DoubleMapper.from_value(value).map(|n| n as f32)
    }
}

pub struct StringMapper;

impl TypedMapper for StringMapper {
    type Model = String;

    fn to_value(&self, model: &String) -> Result<Value, ConversionError> {
        Ok(Value::String(model.clone()))
    }

    fn from_value(&self, value: &Value) -> Result<String, ConversionError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(ConversionError::unexpected("string", other)),
        }
    }
}

pub struct CharMapper;

impl TypedMapper for CharMapper {
    type Model = char;

    fn to_value(&self, model: &char) -> Result<Value, ConversionError> {
        Ok(Value::String(model.to_string()))
    }

    fn from_value(&self, value: &Value) -> Result<char, ConversionError> {
        let s = StringMapper.from_value(value)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(ConversionError::new(format!(
                "expected a single character, found \"{}\"",
                s
            ))),
        }
    }
}

pub struct BlobMapper;

impl TypedMapper for BlobMapper {
    type Model = Blob;

    fn to_value(&self, model: &Blob) -> Result<Value, ConversionError> {
        Ok(Value::Blob(model.0.clone()))
    }

    fn from_value(&self, value: &Value) -> Result<Blob, ConversionError> {
        match value {
            Value::Blob(bytes) => Ok(Blob(bytes.clone())),
            other => Err(ConversionError::unexpected("blob", other)),
        }
    }
}

/// Raw nested records.
pub struct RecordMapper;

impl TypedMapper for RecordMapper {
    type Model = Record;

    fn to_value(&self, model: &Record) -> Result<Value, ConversionError> {
        Ok(Value::Entity(Box::new(model.clone())))
    }

    fn from_value(&self, value: &Value) -> Result<Record, ConversionError> {
        match value {
            Value::Entity(record) => Ok(record.as_ref().clone()),
            other => Err(ConversionError::unexpected("entity", other)),
        }
    }
}

fn timestamp(value: &Value) -> Result<StorageDatetime, ConversionError> {
    match value {
        Value::Timestamp(ts) => Ok(*ts),
        other => Err(ConversionError::unexpected("timestamp", other)),
    }
}

pub struct StorageDatetimeMapper;

impl TypedMapper for StorageDatetimeMapper {
    type Model = StorageDatetime;

    fn to_value(&self, model: &StorageDatetime) -> Result<Value, ConversionError> {
        Ok(Value::Timestamp(StorageDatetime::truncated(model.0)))
    }

    fn from_value(&self, value: &Value) -> Result<StorageDatetime, ConversionError> {
        timestamp(value)
    }
}

pub struct UtcDateTimeMapper;

impl TypedMapper for UtcDateTimeMapper {
    type Model = DateTime<Utc>;

    fn to_value(&self, model: &DateTime<Utc>) -> Result<Value, ConversionError> {
        Ok(Value::Timestamp(StorageDatetime::truncated(*model)))
    }

    fn from_value(&self, value: &Value) -> Result<DateTime<Utc>, ConversionError> {
        timestamp(value).map(|ts| ts.0)
    }
}

/// Offsets are not stored; values load back in UTC.
pub struct FixedOffsetDateTimeMapper;

impl TypedMapper for FixedOffsetDateTimeMapper {
    type Model = DateTime<FixedOffset>;

    fn to_value(&self, model: &DateTime<FixedOffset>) -> Result<Value, ConversionError> {
        Ok(Value::Timestamp(StorageDatetime::truncated(
            model.with_timezone(&Utc),
        )))
    }

    fn from_value(&self, value: &Value) -> Result<DateTime<FixedOffset>, ConversionError> {
        timestamp(value).map(|ts| DateTime::<FixedOffset>::from(ts.0))
    }
}

/// Naive values are read as UTC.
pub struct NaiveDateTimeMapper;

impl TypedMapper for NaiveDateTimeMapper {
    type Model = NaiveDateTime;

    fn to_value(&self, model: &NaiveDateTime) -> Result<Value, ConversionError> {
        Ok(Value::Timestamp(StorageDatetime::truncated(model.and_utc())))
    }

    fn from_value(&self, value: &Value) -> Result<NaiveDateTime, ConversionError> {
        timestamp(value).map(|ts| ts.0.naive_utc())
    }
}

pub struct SystemTimeMapper;

impl TypedMapper for SystemTimeMapper {
    type Model = SystemTime;

    fn to_value(&self, model: &SystemTime) -> Result<Value, ConversionError> {
        Ok(Value::Timestamp(StorageDatetime::truncated(
            DateTime::<Utc>::from(*model),
        )))
    }

    fn from_value(&self, value: &Value) -> Result<SystemTime, ConversionError> {
        timestamp(value).map(|ts| SystemTime::from(ts.0))
    }
}

/// Wraps the mapper of `T` to handle `Option<T>`; `None` maps to null.
pub struct OptionalMapper {
    inner: Arc<dyn ValueMapper>,
    adapter: OptionAdapter,
    type_name: &'static str,
}

impl ValueMapper for OptionalMapper {
    fn to_datastore(&self, value: &dyn Any) -> Result<Value, ConversionError> {
        match (self.adapter.project)(value) {
            Some(Some(inner)) => self.inner.to_datastore(inner),
            Some(None) => Ok(Value::Null),
            None => Err(ConversionError::type_mismatch(self.type_name)),
        }
    }

    fn to_model(&self, value: &Value) -> Result<AnyValue, ConversionError> {
        let inner = match value {
            Value::Null => None,
            other => Some(self.inner.to_model(other)?),
        };
        (self.adapter.inject)(inner).ok_or_else(|| ConversionError::type_mismatch(self.type_name))
    }
}

/// Wraps the mapper of `T` to handle `Vec<T>` as a list value.
pub struct ListMapper {
    element: Arc<dyn ValueMapper>,
    adapter: ListAdapter,
    type_name: &'static str,
}

impl ValueMapper for ListMapper {
    fn to_datastore(&self, value: &dyn Any) -> Result<Value, ConversionError> {
        let elements = (self.adapter.elements)(value)
            .ok_or_else(|| ConversionError::type_mismatch(self.type_name))?;
        elements
            .into_iter()
            .map(|element| self.element.to_datastore(element))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
    }

    fn to_model(&self, value: &Value) -> Result<AnyValue, ConversionError> {
        let values = match value {
            Value::List(values) => values
                .iter()
                .map(|v| self.element.to_model(v))
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(ConversionError::unexpected("list", other)),
        };
        (self.adapter.collect)(values).ok_or_else(|| ConversionError::type_mismatch(self.type_name))
    }
}

/// Registry of value mappers keyed by declared type.
///
/// Lookups check exact registrations first, then fall back to wrapping the
/// registered mapper of an `Option<_>` or `Vec<_>` element type. A wrapper
/// is kept once built. Mappers registered after a type has been introspected
/// do not affect its cached descriptor.
pub struct MapperRegistry {
    mappers: RwLock<HashMap<TypeId, Arc<dyn ValueMapper>>>,
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MapperRegistry {
    /// A registry holding the built-in mappers.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_typed(BooleanMapper);
        registry.register_typed(IntegerMapper::<i8>::new());
        registry.register_typed(IntegerMapper::<i16>::new());
        registry.register_typed(IntegerMapper::<i32>::new());
        registry.register_typed(IntegerMapper::<i64>::new());
        registry.register_typed(IntegerMapper::<u8>::new());
        registry.register_typed(IntegerMapper::<u16>::new());
        registry.register_typed(IntegerMapper::<u32>::new());
        registry.register_typed(DoubleMapper);
        registry.register_typed(FloatMapper);
        registry.register_typed(StringMapper);
        registry.register_typed(CharMapper);
        registry.register_typed(BlobMapper);
        registry.register_typed(RecordMapper);
        registry.register_typed(StorageDatetimeMapper);
        registry.register_typed(UtcDateTimeMapper);
        registry.register_typed(FixedOffsetDateTimeMapper);
        registry.register_typed(NaiveDateTimeMapper);
        registry.register_typed(SystemTimeMapper);
        registry
    }

    pub fn empty() -> Self {
        Self {
            mappers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `mapper` for values of type `F`, replacing any previous one.
    pub fn register<F: FieldType>(&self, mapper: impl ValueMapper + 'static) {
        self.mappers
            .write()
            .insert(TypeId::of::<F>(), Arc::new(mapper));
    }

    pub fn register_typed<M: TypedMapper + 'static>(&self, mapper: M) {
        self.mappers
            .write()
            .insert(TypeId::of::<M::Model>(), Arc::new(mapper));
    }

    pub fn contains(&self, declared: &TypeRef) -> bool {
        self.resolve(declared).is_some()
    }

    /// Find the mapper for a declared type, or `None` when nothing fits.
    pub fn resolve(&self, declared: &TypeRef) -> Option<Arc<dyn ValueMapper>> {
        if let Some(mapper) = self.mappers.read().get(&declared.id()) {
            return Some(mapper.clone());
        }
        let mapper: Arc<dyn ValueMapper> = match declared.shape() {
            TypeShape::Scalar => return None,
            TypeShape::Optional(inner, adapter) => Arc::new(OptionalMapper {
                inner: self.resolve(inner)?,
                adapter: *adapter,
                type_name: declared.name(),
            }),
            TypeShape::List(element, adapter) => Arc::new(ListMapper {
                element: self.resolve(element)?,
                adapter: *adapter,
                type_name: declared.name(),
            }),
        };
        let mapper = self.mappers.write().entry(declared.id()).or_insert(mapper).clone();
        Some(mapper)
    }
}
