// src/codec/value.rs

//! The dynamic value representation: a tagged sum of everything a codec
//! tree can produce. This is the "any" target of the decode pipeline and
//! the input representation for argument encoding.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::model::{
    BigInt, ConfigMemory, DateDuration, Datetime, Decimal, Duration, EnumValue, Json, LocalDate,
    LocalDatetime, LocalTime, RelativeDuration,
};
use crate::protocol::Cardinality;

/// One element of an object shape: its name plus link/cardinality metadata
/// from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeElement {
    pub name: String,
    pub cardinality: Cardinality,
    /// True for fields the server injected (e.g. implicit `id`).
    pub implicit: bool,
    pub is_link: bool,
    pub is_link_property: bool,
}

/// The field layout of an object value, shared between every row decoded
/// through the same codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShape {
    pub elements: Vec<ShapeElement>,
}

impl ObjectShape {
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(|e| e.name.as_str())
    }
}

/// The field names of a named tuple, shared between decoded values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTupleShape {
    pub names: Vec<String>,
}

/// A sparse object: each field independently present, absent, or
/// explicitly reset (`None`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseObject {
    pub fields: Vec<(String, Option<Value>)>,
}

impl SparseObject {
    pub fn new() -> Self {
        SparseObject { fields: Vec::new() }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), Some(value)));
    }

    pub fn get(&self, name: &str) -> Option<&Option<Value>> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A range over an orderable scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub lower: Option<Box<Value>>,
    pub upper: Option<Box<Value>>,
    pub inc_lower: bool,
    pub inc_upper: bool,
    pub empty: bool,
}

impl Range {
    pub fn empty() -> Self {
        Range {
            lower: None,
            upper: None,
            inc_lower: false,
            inc_upper: false,
            empty: true,
        }
    }
}

/// A decoded (or to-be-encoded) value of any wire shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / null.
    Nothing,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Bytes(Bytes),
    Uuid(Uuid),
    Json(Json),
    BigInt(BigInt),
    Decimal(Decimal),
    Datetime(Datetime),
    LocalDatetime(LocalDatetime),
    LocalDate(LocalDate),
    LocalTime(LocalTime),
    Duration(Duration),
    RelativeDuration(RelativeDuration),
    DateDuration(DateDuration),
    ConfigMemory(ConfigMemory),
    Enum(EnumValue),
    Array(Vec<Value>),
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    NamedTuple {
        shape: Arc<NamedTupleShape>,
        fields: Vec<Value>,
    },
    Object {
        shape: Arc<ObjectShape>,
        fields: Vec<Option<Value>>,
    },
    SparseObject(SparseObject),
    Range(Range),
}

impl Value {
    /// Diagnostic name of the variant, used in decode/encode errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::BigInt(_) => "bigint",
            Value::Decimal(_) => "decimal",
            Value::Datetime(_) => "datetime",
            Value::LocalDatetime(_) => "local_datetime",
            Value::LocalDate(_) => "local_date",
            Value::LocalTime(_) => "local_time",
            Value::Duration(_) => "duration",
            Value::RelativeDuration(_) => "relative_duration",
            Value::DateDuration(_) => "date_duration",
            Value::ConfigMemory(_) => "config_memory",
            Value::Enum(_) => "enum",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Tuple(_) => "tuple",
            Value::NamedTuple { .. } => "named_tuple",
            Value::Object { .. } => "object",
            Value::SparseObject(_) => "sparse_object",
            Value::Range(_) => "range",
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    /// An ordered view of `(field name, value)` pairs for object and
    /// named-tuple values; `None` for anything else.
    pub fn fields(&self) -> Option<Vec<(&str, Option<&Value>)>> {
        match self {
            Value::Object { shape, fields } => Some(
                shape
                    .elements
                    .iter()
                    .zip(fields)
                    .map(|(e, v)| (e.name.as_str(), v.as_ref()))
                    .collect(),
            ),
            Value::NamedTuple { shape, fields } => Some(
                shape
                    .names
                    .iter()
                    .zip(fields)
                    .map(|(n, v)| (n.as_str(), Some(v)))
                    .collect(),
            ),
            _ => None,
        }
    }
}

// Conversions used when supplying query arguments.

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Value {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => Str,
    Bytes => Bytes,
    Uuid => Uuid,
    BigInt => BigInt,
    Decimal => Decimal,
    Datetime => Datetime,
    LocalDatetime => LocalDatetime,
    LocalDate => LocalDate,
    LocalTime => LocalTime,
    Duration => Duration,
    RelativeDuration => RelativeDuration,
    DateDuration => DateDuration,
    ConfigMemory => ConfigMemory,
    EnumValue => Enum,
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Value {
        match v {
            Some(v) => v.into(),
            None => Value::Nothing,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Value {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}
