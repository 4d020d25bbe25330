// src/codec/mod.rs

//! The codec system: translation between wire bytes and [`Value`]s, with
//! shape resolved dynamically from server type descriptors.
//!
//! Codecs form trees mirroring the input/output shape of a prepared query.
//! Every codec is identified by a server-assigned 128-bit id; equal ids
//! denote equivalent shapes, so codecs are built once and shared through
//! the process-wide [`registry`].

pub mod arguments;
pub mod cache;
pub mod composite;
pub mod descriptor;
pub mod queryable;
pub mod registry;
pub mod scalar;
pub mod value;

use std::sync::Arc;

pub use arguments::{Arguments, QueryArg};
pub use cache::{CachedQuery, QueryCache, QueryCacheKey};
pub use descriptor::DescriptorReader;
pub use queryable::{Fields, Queryable};
pub use registry::CodecRegistry;
pub use value::{NamedTupleShape, ObjectShape, Range, ShapeElement, SparseObject, Value};

use crate::errors::Result;
use crate::protocol::PacketWriter;

/// A paired encoder/decoder for one wire shape.
///
/// `decode` consumes exactly the byte slice that the surrounding envelope
/// assigned to this element; `encode` appends the element body (without any
/// envelope) to the writer.
pub trait Codec: std::fmt::Debug + Send + Sync {
    fn decode(&self, buf: &[u8]) -> Result<Value>;

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()>;

    /// Diagnostic name used in error messages.
    fn kind(&self) -> &'static str;

    /// The shape this codec imposes on query arguments, if it can head an
    /// input tree: the ordered element list with names, cardinalities, and
    /// element codecs.
    fn input_shape(&self) -> Option<(&ObjectShape, &[Arc<dyn Codec>])> {
        None
    }

    /// The field layout of a sparse (session-state) codec, if any.
    fn sparse_shape(&self) -> Option<(&[String], &[Arc<dyn Codec>])> {
        None
    }
}

/// Well-known type ids pre-registered for every connection. Scalars own the
/// low id space; composite ids are minted by the server per shape.
pub mod ids {
    use uuid::Uuid;

    pub const NULL: Uuid = Uuid::nil();
    /// The input shape of a query with no parameters.
    pub const EMPTY_TUPLE: Uuid = Uuid::from_u128(0xFF);

    pub const UUID: Uuid = Uuid::from_u128(0x100);
    pub const STR: Uuid = Uuid::from_u128(0x101);
    pub const BYTES: Uuid = Uuid::from_u128(0x102);
    pub const INT16: Uuid = Uuid::from_u128(0x103);
    pub const INT32: Uuid = Uuid::from_u128(0x104);
    pub const INT64: Uuid = Uuid::from_u128(0x105);
    pub const FLOAT32: Uuid = Uuid::from_u128(0x106);
    pub const FLOAT64: Uuid = Uuid::from_u128(0x107);
    pub const DECIMAL: Uuid = Uuid::from_u128(0x108);
    pub const BOOL: Uuid = Uuid::from_u128(0x109);
    pub const DATETIME: Uuid = Uuid::from_u128(0x10a);
    pub const LOCAL_DATETIME: Uuid = Uuid::from_u128(0x10b);
    pub const LOCAL_DATE: Uuid = Uuid::from_u128(0x10c);
    pub const LOCAL_TIME: Uuid = Uuid::from_u128(0x10d);
    pub const DURATION: Uuid = Uuid::from_u128(0x10e);
    pub const JSON: Uuid = Uuid::from_u128(0x10f);
    pub const BIGINT: Uuid = Uuid::from_u128(0x110);
    pub const RELATIVE_DURATION: Uuid = Uuid::from_u128(0x111);
    pub const DATE_DURATION: Uuid = Uuid::from_u128(0x112);
    pub const CONFIG_MEMORY: Uuid = Uuid::from_u128(0x130);
}
