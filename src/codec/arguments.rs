// src/codec/arguments.rs

//! Query argument encoding: bridges caller-supplied values (positional or
//! named) onto the input codec of a parsed query.
//!
//! Each element is written as `(reserved: i32, length: i32, data)` with
//! length -1 for null. Type checking is delegated to the element codecs,
//! which accept lossless widenings and reject narrowing; enum-to-string
//! coercion happens only inside the `str` codec.

use std::sync::Arc;

use bytes::Bytes;

use super::value::Value;
use super::{ids, Codec};
use crate::errors::{PeridotError, Result};
use crate::protocol::{Cardinality, PacketWriter};

/// A single value usable as a query argument.
pub trait QueryArg {
    fn to_value(&self) -> Value;
}

impl<T> QueryArg for T
where
    T: Into<Value> + Clone,
{
    fn to_value(&self) -> Value {
        self.clone().into()
    }
}

/// Arguments for one query execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Arguments {
    /// The query takes no parameters.
    #[default]
    None,
    /// Values bound to parameters `$0 .. $n-1` in order.
    Positional(Vec<Value>),
    /// Values bound to parameters by name.
    Named(Vec<(String, Value)>),
}

impl Arguments {
    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: QueryArg,
    {
        Arguments::Positional(values.into_iter().map(|v| v.to_value()).collect())
    }

    pub fn named<I, N>(values: I) -> Self
    where
        I: IntoIterator<Item = (N, Value)>,
        N: Into<String>,
    {
        Arguments::Named(values.into_iter().map(|(n, v)| (n.into(), v)).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Arguments::None => true,
            Arguments::Positional(v) => v.is_empty(),
            Arguments::Named(v) => v.is_empty(),
        }
    }
}

impl From<()> for Arguments {
    fn from(_: ()) -> Self {
        Arguments::None
    }
}

macro_rules! impl_arguments_for_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: QueryArg),+> From<($($name,)+)> for Arguments {
            fn from(tuple: ($($name,)+)) -> Self {
                Arguments::Positional(vec![$(tuple.$idx.to_value()),+])
            }
        }
    };
}

impl_arguments_for_tuple!(A: 0);
impl_arguments_for_tuple!(A: 0, B: 1);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// Encodes `args` against the input codec of a parsed query.
pub fn encode(
    input_codec: &Arc<dyn Codec>,
    input_id: &uuid::Uuid,
    args: &Arguments,
) -> Result<Bytes> {
    // A parameterless query carries the empty tuple (or null) input shape.
    if *input_id == ids::EMPTY_TUPLE || *input_id == ids::NULL {
        if !args.is_empty() {
            return Err(PeridotError::ArgumentMismatch(
                "query takes no arguments, but some were supplied".to_string(),
            ));
        }
        let mut w = PacketWriter::new();
        w.write_i32(0);
        return Ok(w.into_bytes());
    }

    let (shape, codecs) = input_codec.input_shape().ok_or_else(|| {
        PeridotError::ArgumentMismatch(format!(
            "query input codec is {}, not an argument shape",
            input_codec.kind()
        ))
    })?;

    // Resolve each shape element to the supplied value (or null).
    let mut bound: Vec<Option<Value>> = Vec::with_capacity(shape.elements.len());
    match args {
        Arguments::None => {
            for element in &shape.elements {
                if element.cardinality != Cardinality::AtMostOne {
                    return Err(PeridotError::ArgumentMismatch(format!(
                        "missing required argument '{}'",
                        element.name
                    )));
                }
                bound.push(None);
            }
        }
        Arguments::Positional(values) => {
            if values.len() != shape.elements.len() {
                return Err(PeridotError::ArgumentMismatch(format!(
                    "query takes {} arguments, {} were supplied",
                    shape.elements.len(),
                    values.len()
                )));
            }
            for (element, value) in shape.elements.iter().zip(values) {
                // Positional shapes name their elements "0".."n-1"; a named
                // shape cannot be satisfied positionally.
                if element.name.parse::<usize>().is_err() {
                    return Err(PeridotError::ArgumentMismatch(format!(
                        "query uses named argument '${}'; supply arguments by name",
                        element.name
                    )));
                }
                bound.push(nullable(value, &element.name, element.cardinality)?);
            }
        }
        Arguments::Named(values) => {
            for (name, _) in values {
                if !shape.elements.iter().any(|e| &e.name == name) {
                    return Err(PeridotError::ArgumentMismatch(format!(
                        "unknown argument '${name}'"
                    )));
                }
            }
            for element in &shape.elements {
                match values.iter().find(|(name, _)| name == &element.name) {
                    Some((_, value)) => {
                        bound.push(nullable(value, &element.name, element.cardinality)?)
                    }
                    None if element.cardinality == Cardinality::AtMostOne => bound.push(None),
                    None => {
                        return Err(PeridotError::ArgumentMismatch(format!(
                            "missing required argument '${}'",
                            element.name
                        )));
                    }
                }
            }
        }
    }

    let mut w = PacketWriter::new();
    w.write_i32(bound.len() as i32);
    for (value, codec) in bound.iter().zip(codecs) {
        w.write_i32(0);
        match value {
            Some(value) => {
                let pos = w.begin_length();
                codec.encode(&mut w, value)?;
                w.backfill_length(pos);
            }
            None => w.write_i32(-1),
        }
    }
    Ok(w.into_bytes())
}

fn nullable(value: &Value, name: &str, cardinality: Cardinality) -> Result<Option<Value>> {
    if value.is_nothing() {
        if cardinality != Cardinality::AtMostOne {
            return Err(PeridotError::ArgumentMismatch(format!(
                "argument '${name}' is required and cannot be null"
            )));
        }
        return Ok(None);
    }
    Ok(Some(value.clone()))
}
