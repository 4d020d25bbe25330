// src/codec/queryable.rs

//! Typed decoding: the bridge from the dynamic [`Value`] representation to
//! caller-requested Rust types.
//!
//! [`Queryable`] is the generic decode entry point. Scalars map one-to-one
//! onto their variants with no implicit conversions; `Option<T>` absorbs
//! nulls; tuples accept both positional and named tuples positionally; and
//! [`Value`] itself is the catch-all target that accepts any shape.
//!
//! Struct-like targets implement `Queryable` through [`Fields`], which
//! presents an object or named tuple as an ordered field map: missing
//! required fields fail the decode, extra fields are ignored.

use bytes::Bytes;
use uuid::Uuid;

use super::value::Value;
use crate::errors::{PeridotError, Result};
use crate::model::{
    BigInt, ConfigMemory, DateDuration, Datetime, Decimal, Duration, EnumValue, Json, LocalDate,
    LocalDatetime, LocalTime, RelativeDuration,
};

/// A type that query results can decode into.
pub trait Queryable: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn wrong_shape(expected: &str, value: &Value) -> PeridotError {
    PeridotError::DecodeError(format!(
        "expected {expected}, the query returned {}",
        value.kind_name()
    ))
}

impl Queryable for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

macro_rules! impl_queryable_scalar {
    ($($ty:ty => $variant:ident / $name:literal),* $(,)?) => {
        $(
            impl Queryable for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(wrong_shape($name, &other)),
                    }
                }
            }
        )*
    };
}

impl_queryable_scalar! {
    bool => Bool / "bool",
    i16 => Int16 / "int16",
    i32 => Int32 / "int32",
    i64 => Int64 / "int64",
    f32 => Float32 / "float32",
    f64 => Float64 / "float64",
    String => Str / "str",
    Bytes => Bytes / "bytes",
    Uuid => Uuid / "uuid",
    Json => Json / "json",
    BigInt => BigInt / "bigint",
    Decimal => Decimal / "decimal",
    Datetime => Datetime / "datetime",
    LocalDatetime => LocalDatetime / "local_datetime",
    LocalDate => LocalDate / "local_date",
    LocalTime => LocalTime / "local_time",
    Duration => Duration / "duration",
    RelativeDuration => RelativeDuration / "relative_duration",
    DateDuration => DateDuration / "date_duration",
    ConfigMemory => ConfigMemory / "config_memory",
    EnumValue => Enum / "enum",
}

impl<T: Queryable> Queryable for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Nothing => Ok(None),
            other => Ok(Some(T::from_value(other)?)),
        }
    }
}

impl<T: Queryable> Queryable for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Set(items) | Value::Array(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            other => Err(wrong_shape("a set or array", &other)),
        }
    }
}

/// Tuples decode positionally from both tuples and named tuples, so
/// `select (one := 1, two := 2)` satisfies a `(i64, i64)` target.
macro_rules! impl_queryable_tuple {
    ($count:literal; $($name:ident),+) => {
        impl<$($name: Queryable),+> Queryable for ($($name,)+) {
            fn from_value(value: Value) -> Result<Self> {
                let fields = match value {
                    Value::Tuple(fields) => fields,
                    Value::NamedTuple { fields, .. } => fields,
                    other => return Err(wrong_shape("a tuple", &other)),
                };
                if fields.len() != $count {
                    return Err(PeridotError::DecodeError(format!(
                        "expected a {}-element tuple, the query returned {} elements",
                        $count,
                        fields.len()
                    )));
                }
                let mut iter = fields.into_iter();
                Ok(($($name::from_value(iter.next().unwrap())?,)+))
            }
        }
    };
}

impl_queryable_tuple!(1; A);
impl_queryable_tuple!(2; A, B);
impl_queryable_tuple!(3; A, B, C);
impl_queryable_tuple!(4; A, B, C, D);
impl_queryable_tuple!(5; A, B, C, D, E);
impl_queryable_tuple!(6; A, B, C, D, E, F);

/// An ordered `(field name, value)` view over an object or named tuple,
/// consumed by struct `Queryable` implementations:
///
/// ```ignore
/// impl Queryable for Movie {
///     fn from_value(value: Value) -> Result<Self> {
///         let mut fields = Fields::new(value)?;
///         Ok(Movie {
///             title: fields.required("title")?,
///             year: fields.optional("year")?,
///         })
///     }
/// }
/// ```
pub struct Fields {
    slots: Vec<Option<(String, Option<Value>)>>,
}

impl Fields {
    pub fn new(value: Value) -> Result<Self> {
        let slots = match value {
            Value::Object { shape, fields } => shape
                .elements
                .iter()
                .zip(fields)
                .map(|(e, v)| Some((e.name.clone(), v)))
                .collect(),
            Value::NamedTuple { shape, fields } => shape
                .names
                .iter()
                .zip(fields)
                .map(|(n, v)| Some((n.clone(), Some(v))))
                .collect(),
            other => return Err(wrong_shape("an object", &other)),
        };
        Ok(Fields { slots })
    }

    fn take(&mut self, name: &str) -> Option<Option<Value>> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|(n, _)| n == name))?;
        slot.take().map(|(_, v)| v)
    }

    /// Decodes a field that must be present. A present-but-null field
    /// decodes as [`Value::Nothing`], so `Option` targets still work.
    pub fn required<T: Queryable>(&mut self, name: &str) -> Result<T> {
        match self.take(name) {
            Some(Some(value)) => T::from_value(value),
            Some(None) => T::from_value(Value::Nothing),
            None => Err(PeridotError::DecodeError(format!(
                "required field '{name}' is missing from the result shape"
            ))),
        }
    }

    /// Decodes a field that may be absent from the shape entirely.
    pub fn optional<T: Queryable>(&mut self, name: &str) -> Result<Option<T>> {
        match self.take(name) {
            Some(Some(value)) => Ok(Some(T::from_value(value)?)),
            Some(None) | None => Ok(None),
        }
    }

    /// Names of the fields not consumed by `required`/`optional`. Extra
    /// fields are not an error; this exists for diagnostics.
    pub fn remaining(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|(n, _)| n.as_str()))
            .collect()
    }
}
