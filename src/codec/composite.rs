// src/codec/composite.rs

//! Composite codecs: tuples, named tuples, objects, arrays, sets, ranges,
//! enums, and sparse objects.
//!
//! Tuple-family elements travel as `(reserved: i32, length: i32, data)`
//! with `length == -1` marking null. Array and set elements carry only the
//! length. An empty array or set serializes with a zero-dimension envelope.

use std::sync::Arc;

use super::value::{NamedTupleShape, ObjectShape, Range, SparseObject, Value};
use super::Codec;
use crate::errors::{PeridotError, Result};
use crate::model::EnumValue;
use crate::protocol::{PacketReader, PacketWriter};

/// Reads one `(length, data)` envelope; `None` for a null element.
fn read_element<'a>(r: &mut PacketReader<'a>) -> Result<Option<&'a [u8]>> {
    let len = r.read_i32()?;
    if len < 0 {
        return Ok(None);
    }
    Ok(Some(r.read_raw(len as usize)?))
}

/// Writes one element envelope, encoding `Nothing` as length -1.
fn write_element(w: &mut PacketWriter, codec: &Arc<dyn Codec>, value: &Value) -> Result<()> {
    if value.is_nothing() {
        w.write_i32(-1);
        return Ok(());
    }
    let pos = w.begin_length();
    codec.encode(w, value)?;
    w.backfill_length(pos);
    Ok(())
}

/// The codec for the inputs of a query with no parameters, and for any
/// zero-or-more element tuple.
#[derive(Debug)]
pub struct TupleCodec {
    pub elements: Vec<Arc<dyn Codec>>,
}

impl TupleCodec {
    pub fn empty() -> Self {
        TupleCodec {
            elements: Vec::new(),
        }
    }
}

impl Codec for TupleCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let mut r = PacketReader::new(buf);
        let count = r.read_i32()? as usize;
        if count != self.elements.len() {
            return Err(PeridotError::DecodeError(format!(
                "tuple wire count {count} does not match its {} element codecs",
                self.elements.len()
            )));
        }
        let mut fields = Vec::with_capacity(count);
        for codec in &self.elements {
            let _reserved = r.read_i32()?;
            match read_element(&mut r)? {
                Some(body) => fields.push(codec.decode(body)?),
                None => fields.push(Value::Nothing),
            }
        }
        r.expect_end("tuple")?;
        Ok(Value::Tuple(fields))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        let fields = match value {
            Value::Tuple(fields) => fields,
            other => {
                return Err(PeridotError::ArgumentMismatch(format!(
                    "cannot encode a {} value with the tuple codec",
                    other.kind_name()
                )));
            }
        };
        if fields.len() != self.elements.len() {
            return Err(PeridotError::ArgumentMismatch(format!(
                "tuple has {} fields, codec expects {}",
                fields.len(),
                self.elements.len()
            )));
        }
        w.write_i32(fields.len() as i32);
        for (codec, field) in self.elements.iter().zip(fields) {
            w.write_i32(0);
            write_element(w, codec, field)?;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "tuple"
    }
}

#[derive(Debug)]
pub struct NamedTupleCodec {
    pub shape: Arc<NamedTupleShape>,
    pub elements: Vec<Arc<dyn Codec>>,
}

impl Codec for NamedTupleCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let mut r = PacketReader::new(buf);
        let count = r.read_i32()? as usize;
        if count != self.elements.len() {
            return Err(PeridotError::DecodeError(format!(
                "named tuple wire count {count} does not match its {} element codecs",
                self.elements.len()
            )));
        }
        let mut fields = Vec::with_capacity(count);
        for codec in &self.elements {
            let _reserved = r.read_i32()?;
            match read_element(&mut r)? {
                Some(body) => fields.push(codec.decode(body)?),
                None => fields.push(Value::Nothing),
            }
        }
        r.expect_end("named tuple")?;
        Ok(Value::NamedTuple {
            shape: self.shape.clone(),
            fields,
        })
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        let fields = match value {
            Value::NamedTuple { fields, .. } => fields,
            Value::Tuple(fields) => fields,
            other => {
                return Err(PeridotError::ArgumentMismatch(format!(
                    "cannot encode a {} value with the named tuple codec",
                    other.kind_name()
                )));
            }
        };
        if fields.len() != self.elements.len() {
            return Err(PeridotError::ArgumentMismatch(format!(
                "named tuple has {} fields, codec expects {}",
                fields.len(),
                self.elements.len()
            )));
        }
        w.write_i32(fields.len() as i32);
        for (codec, field) in self.elements.iter().zip(fields) {
            w.write_i32(0);
            write_element(w, codec, field)?;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "named_tuple"
    }
}

/// Objects share the tuple element layout; the shape carries field names
/// and per-element cardinality, which is what makes links representable.
#[derive(Debug)]
pub struct ObjectCodec {
    pub shape: Arc<ObjectShape>,
    pub elements: Vec<Arc<dyn Codec>>,
}

impl Codec for ObjectCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let mut r = PacketReader::new(buf);
        let count = r.read_i32()? as usize;
        if count != self.elements.len() {
            return Err(PeridotError::DecodeError(format!(
                "object wire count {count} does not match its {} shape elements",
                self.elements.len()
            )));
        }
        let mut fields = Vec::with_capacity(count);
        for codec in &self.elements {
            let _reserved = r.read_i32()?;
            match read_element(&mut r)? {
                Some(body) => fields.push(Some(codec.decode(body)?)),
                None => fields.push(None),
            }
        }
        r.expect_end("object")?;
        Ok(Value::Object {
            shape: self.shape.clone(),
            fields,
        })
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        // Objects are encoded only as query inputs, where the argument
        // encoder has already matched values to shape positions.
        let fields = match value {
            Value::Object { fields, .. } => fields,
            other => {
                return Err(PeridotError::ArgumentMismatch(format!(
                    "cannot encode a {} value with the object codec",
                    other.kind_name()
                )));
            }
        };
        if fields.len() != self.elements.len() {
            return Err(PeridotError::ArgumentMismatch(format!(
                "object has {} fields, codec expects {}",
                fields.len(),
                self.elements.len()
            )));
        }
        w.write_i32(fields.len() as i32);
        for (codec, field) in self.elements.iter().zip(fields) {
            w.write_i32(0);
            match field {
                Some(value) => write_element(w, codec, value)?,
                None => w.write_i32(-1),
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "object"
    }

    fn input_shape(&self) -> Option<(&ObjectShape, &[Arc<dyn Codec>])> {
        Some((&self.shape, &self.elements))
    }
}

fn decode_dimensions(
    kind: &'static str,
    r: &mut PacketReader<'_>,
    max_dims: Option<usize>,
) -> Result<usize> {
    let ndims = r.read_i32()?;
    let _flags = r.read_i32()?;
    let _reserved = r.read_i32()?;
    if ndims == 0 {
        return Ok(0);
    }
    if ndims < 0 || max_dims.is_some_and(|max| ndims as usize > max) {
        return Err(PeridotError::DecodeError(format!(
            "{kind} with invalid dimension count {ndims}"
        )));
    }
    let mut count: usize = 1;
    for _ in 0..ndims {
        let upper = r.read_i32()?;
        let lower = r.read_i32()?;
        let len = (upper - lower + 1).max(0) as usize;
        count = count.saturating_mul(len);
    }
    // Each element needs at least its 4-byte length envelope; a count the
    // buffer cannot possibly hold means a desynchronized stream.
    if count > r.remaining() / 4 {
        return Err(PeridotError::DecodeError(format!(
            "{kind} claims {count} elements in a {} byte body",
            r.remaining()
        )));
    }
    Ok(count)
}

fn encode_sequence(
    w: &mut PacketWriter,
    codec: &Arc<dyn Codec>,
    items: &[Value],
) -> Result<()> {
    if items.is_empty() {
        w.write_i32(0);
        w.write_i32(0);
        w.write_i32(0);
        return Ok(());
    }
    w.write_i32(1);
    w.write_i32(0);
    w.write_i32(0);
    w.write_i32(items.len() as i32);
    w.write_i32(1);
    for item in items {
        if item.is_nothing() {
            w.write_i32(-1);
        } else {
            let pos = w.begin_length();
            codec.encode(w, item)?;
            w.backfill_length(pos);
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct ArrayCodec {
    pub element: Arc<dyn Codec>,
}

impl Codec for ArrayCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let mut r = PacketReader::new(buf);
        let count = decode_dimensions("array", &mut r, Some(1))?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            match read_element(&mut r)? {
                Some(body) => items.push(self.element.decode(body)?),
                None => items.push(Value::Nothing),
            }
        }
        r.expect_end("array")?;
        Ok(Value::Array(items))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Array(items) => encode_sequence(w, &self.element, items),
            other => Err(PeridotError::ArgumentMismatch(format!(
                "cannot encode a {} value with the array codec",
                other.kind_name()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        "array"
    }
}

#[derive(Debug)]
pub struct SetCodec {
    pub element: Arc<dyn Codec>,
}

impl Codec for SetCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let mut r = PacketReader::new(buf);
        let count = decode_dimensions("set", &mut r, None)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            match read_element(&mut r)? {
                Some(body) => items.push(self.element.decode(body)?),
                None => items.push(Value::Nothing),
            }
        }
        r.expect_end("set")?;
        Ok(Value::Set(items))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Set(items) | Value::Array(items) => {
                encode_sequence(w, &self.element, items)
            }
            other => Err(PeridotError::ArgumentMismatch(format!(
                "cannot encode a {} value with the set codec",
                other.kind_name()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        "set"
    }
}

mod range_flags {
    pub const EMPTY: u8 = 0x01;
    pub const LB_INC: u8 = 0x02;
    pub const UB_INC: u8 = 0x04;
    pub const HAS_LB: u8 = 0x08;
    pub const HAS_UB: u8 = 0x10;
}

#[derive(Debug)]
pub struct RangeCodec {
    pub element: Arc<dyn Codec>,
}

impl Codec for RangeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        use range_flags::*;
        let mut r = PacketReader::new(buf);
        let flags = r.read_u8()?;
        if flags & EMPTY != 0 {
            r.expect_end("range")?;
            return Ok(Value::Range(Range::empty()));
        }
        let lower = if flags & HAS_LB != 0 {
            match read_element(&mut r)? {
                Some(body) => Some(Box::new(self.element.decode(body)?)),
                None => None,
            }
        } else {
            None
        };
        let upper = if flags & HAS_UB != 0 {
            match read_element(&mut r)? {
                Some(body) => Some(Box::new(self.element.decode(body)?)),
                None => None,
            }
        } else {
            None
        };
        r.expect_end("range")?;
        Ok(Value::Range(Range {
            lower,
            upper,
            inc_lower: flags & LB_INC != 0,
            inc_upper: flags & UB_INC != 0,
            empty: false,
        }))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        use range_flags::*;
        let range = match value {
            Value::Range(range) => range,
            other => {
                return Err(PeridotError::ArgumentMismatch(format!(
                    "cannot encode a {} value with the range codec",
                    other.kind_name()
                )));
            }
        };
        if range.empty {
            w.write_u8(EMPTY);
            return Ok(());
        }
        let mut flags = 0u8;
        if range.inc_lower {
            flags |= LB_INC;
        }
        if range.inc_upper {
            flags |= UB_INC;
        }
        if range.lower.is_some() {
            flags |= HAS_LB;
        }
        if range.upper.is_some() {
            flags |= HAS_UB;
        }
        w.write_u8(flags);
        if let Some(lower) = &range.lower {
            let pos = w.begin_length();
            self.element.encode(w, lower)?;
            w.backfill_length(pos);
        }
        if let Some(upper) = &range.upper {
            let pos = w.begin_length();
            self.element.encode(w, upper)?;
            w.backfill_length(pos);
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "range"
    }
}

/// Enum values travel as their member name; membership is validated both
/// ways so a desynchronized stream cannot smuggle arbitrary strings.
#[derive(Debug)]
pub struct EnumCodec {
    pub members: Vec<String>,
}

impl EnumCodec {
    fn check_member(&self, name: &str) -> Result<()> {
        if !self.members.iter().any(|m| m == name) {
            return Err(PeridotError::ArgumentMismatch(format!(
                "'{name}' is not a member of this enum"
            )));
        }
        Ok(())
    }
}

impl Codec for EnumCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let name = std::str::from_utf8(buf)?;
        self.check_member(name)?;
        Ok(Value::Enum(EnumValue::new(name)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        let name = match value {
            Value::Enum(v) => v.name(),
            Value::Str(v) => v.as_str(),
            other => {
                return Err(PeridotError::ArgumentMismatch(format!(
                    "cannot encode a {} value with the enum codec",
                    other.kind_name()
                )));
            }
        };
        self.check_member(name)?;
        w.write_raw(name.as_bytes());
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "enum"
    }
}

/// The session-state codec: fields are addressed by position index and each
/// is independently present or absent.
#[derive(Debug)]
pub struct SparseObjectCodec {
    pub names: Vec<String>,
    pub elements: Vec<Arc<dyn Codec>>,
}

impl Codec for SparseObjectCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let mut r = PacketReader::new(buf);
        let count = r.read_i32()?;
        if count < 0 {
            return Err(PeridotError::DecodeError(format!(
                "sparse object with negative field count {count}"
            )));
        }
        let mut sparse = SparseObject::new();
        for _ in 0..count {
            let index = r.read_i32()?;
            let name = self
                .names
                .get(index as usize)
                .ok_or_else(|| {
                    PeridotError::DecodeError(format!(
                        "sparse object field index {index} out of range"
                    ))
                })?
                .clone();
            let codec = &self.elements[index as usize];
            match read_element(&mut r)? {
                Some(body) => sparse.fields.push((name, Some(codec.decode(body)?))),
                None => sparse.fields.push((name, None)),
            }
        }
        r.expect_end("sparse object")?;
        Ok(Value::SparseObject(sparse))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        let sparse = match value {
            Value::SparseObject(sparse) => sparse,
            other => {
                return Err(PeridotError::ArgumentMismatch(format!(
                    "cannot encode a {} value with the sparse object codec",
                    other.kind_name()
                )));
            }
        };
        w.write_i32(sparse.fields.len() as i32);
        for (name, value) in &sparse.fields {
            let index = self
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| {
                    PeridotError::ArgumentMismatch(format!(
                        "field '{name}' is not part of this sparse shape"
                    ))
                })?;
            w.write_i32(index as i32);
            match value {
                Some(value) => {
                    let pos = w.begin_length();
                    self.elements[index].encode(w, value)?;
                    w.backfill_length(pos);
                }
                None => w.write_i32(-1),
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "sparse_object"
    }

    fn sparse_shape(&self) -> Option<(&[String], &[Arc<dyn Codec>])> {
        Some((&self.names, &self.elements))
    }
}
