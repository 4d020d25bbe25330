// src/codec/descriptor.rs

//! Parser for the server's binary type descriptor stream.
//!
//! A descriptor blob is a sequence of typed nodes. Each node carries its
//! kind byte, its 128-bit type id, and a kind-specific payload. Nodes may
//! reference other nodes only by positional index into the portion of the
//! stream already parsed, so a single forward pass materializes every
//! codec: by the time a node is reached, all of its children exist.

use std::sync::Arc;

use uuid::Uuid;

use super::composite::{
    ArrayCodec, EnumCodec, NamedTupleCodec, ObjectCodec, RangeCodec, SetCodec, SparseObjectCodec,
    TupleCodec,
};
use super::registry::CodecRegistry;
use super::value::{NamedTupleShape, ObjectShape, ShapeElement};
use super::{ids, Codec};
use crate::errors::{PeridotError, Result};
use crate::protocol::{Cardinality, PacketReader};

/// Descriptor node kinds.
mod kinds {
    pub const SET: u8 = 0x00;
    pub const OBJECT_SHAPE: u8 = 0x01;
    pub const BASE_SCALAR: u8 = 0x02;
    pub const SCALAR: u8 = 0x03;
    pub const TUPLE: u8 = 0x04;
    pub const NAMED_TUPLE: u8 = 0x05;
    pub const ARRAY: u8 = 0x06;
    pub const ENUM: u8 = 0x07;
    pub const INPUT_SHAPE: u8 = 0x08;
    pub const RANGE: u8 = 0x09;
    /// Kinds at or above this carry a type-name annotation string and
    /// produce no codec.
    pub const ANNOTATION_BASE: u8 = 0x7f;
}

/// Shape element flag bits.
mod shape_flags {
    pub const IMPLICIT: u32 = 1 << 0;
    pub const LINK_PROPERTY: u32 = 1 << 1;
    pub const LINK: u32 = 1 << 2;
}

/// Builds codec trees out of descriptor blobs, caching every node in the
/// given registry.
pub struct DescriptorReader<'a> {
    registry: &'a CodecRegistry,
}

impl<'a> DescriptorReader<'a> {
    pub fn new(registry: &'a CodecRegistry) -> Self {
        DescriptorReader { registry }
    }

    /// Parses `descriptor` and returns the codec for `root_id`.
    ///
    /// The registry is consulted first: a previously materialized id short
    /// circuits without touching the blob.
    pub fn build(&self, root_id: Uuid, descriptor: &[u8]) -> Result<Arc<dyn Codec>> {
        if root_id == ids::NULL {
            return Ok(Arc::new(super::scalar::NothingCodec));
        }
        if let Some(codec) = self.registry.get(&root_id) {
            return Ok(codec);
        }

        let mut r = PacketReader::new(descriptor);
        // Positional slots; annotation nodes occupy a slot but hold no codec.
        let mut slots: Vec<(Uuid, Option<Arc<dyn Codec>>)> = Vec::new();

        while !r.is_empty() {
            let kind = r.read_u8()?;
            if kind >= kinds::ANNOTATION_BASE {
                let id = r.read_uuid()?;
                let _type_name = r.read_string()?;
                slots.push((id, None));
                continue;
            }
            let id = r.read_uuid()?;
            let codec: Arc<dyn Codec> = match kind {
                kinds::BASE_SCALAR => self.registry.get(&id).ok_or_else(|| {
                    PeridotError::MalformedDescriptor(format!(
                        "base scalar {id} is not a well-known type"
                    ))
                })?,
                kinds::SCALAR => {
                    // A derived scalar shares its base codec under its own id.
                    let base = r.read_u16()?;
                    self.resolve(&slots, base)?
                }
                kinds::SET => {
                    let element = self.resolve(&slots, r.read_u16()?)?;
                    Arc::new(SetCodec { element })
                }
                kinds::ARRAY => {
                    let element = self.resolve(&slots, r.read_u16()?)?;
                    let ndims = r.read_u16()?;
                    for _ in 0..ndims {
                        let _dim = r.read_i32()?;
                    }
                    Arc::new(ArrayCodec { element })
                }
                kinds::RANGE => {
                    let element = self.resolve(&slots, r.read_u16()?)?;
                    Arc::new(RangeCodec { element })
                }
                kinds::TUPLE => {
                    let count = r.read_u16()? as usize;
                    let mut elements = Vec::with_capacity(count);
                    for _ in 0..count {
                        elements.push(self.resolve(&slots, r.read_u16()?)?);
                    }
                    Arc::new(TupleCodec { elements })
                }
                kinds::NAMED_TUPLE => {
                    let count = r.read_u16()? as usize;
                    let mut names = Vec::with_capacity(count);
                    let mut elements = Vec::with_capacity(count);
                    for _ in 0..count {
                        names.push(r.read_string()?);
                        elements.push(self.resolve(&slots, r.read_u16()?)?);
                    }
                    Arc::new(NamedTupleCodec {
                        shape: Arc::new(NamedTupleShape { names }),
                        elements,
                    })
                }
                kinds::OBJECT_SHAPE => {
                    let (shape, elements) = self.read_shape(&slots, &mut r)?;
                    Arc::new(ObjectCodec {
                        shape: Arc::new(shape),
                        elements,
                    })
                }
                kinds::INPUT_SHAPE => {
                    let (shape, elements) = self.read_shape(&slots, &mut r)?;
                    Arc::new(SparseObjectCodec {
                        names: shape.elements.into_iter().map(|e| e.name).collect(),
                        elements,
                    })
                }
                kinds::ENUM => {
                    let count = r.read_u16()? as usize;
                    let mut members = Vec::with_capacity(count);
                    for _ in 0..count {
                        members.push(r.read_string()?);
                    }
                    Arc::new(EnumCodec { members })
                }
                other => {
                    return Err(PeridotError::MalformedDescriptor(format!(
                        "unknown descriptor kind 0x{other:02x}"
                    )));
                }
            };
            // Cache under the node's id; a racing builder's entry wins ties.
            let codec = self.registry.insert(id, codec);
            slots.push((id, Some(codec)));
        }

        slots
            .iter()
            .rev()
            .find_map(|(id, codec)| (*id == root_id).then(|| codec.clone()).flatten())
            .or_else(|| self.registry.get(&root_id))
            .ok_or_else(|| {
                PeridotError::MalformedDescriptor(format!(
                    "descriptor stream does not define root type {root_id}"
                ))
            })
    }

    fn resolve(
        &self,
        slots: &[(Uuid, Option<Arc<dyn Codec>>)],
        pos: u16,
    ) -> Result<Arc<dyn Codec>> {
        slots
            .get(pos as usize)
            .ok_or_else(|| {
                PeridotError::MalformedDescriptor(format!(
                    "descriptor references position {pos}, only {} nodes seen",
                    slots.len()
                ))
            })?
            .1
            .clone()
            .ok_or_else(|| {
                PeridotError::MalformedDescriptor(format!(
                    "descriptor references annotation node at position {pos}"
                ))
            })
    }

    fn read_shape(
        &self,
        slots: &[(Uuid, Option<Arc<dyn Codec>>)],
        r: &mut PacketReader<'_>,
    ) -> Result<(ObjectShape, Vec<Arc<dyn Codec>>)> {
        let count = r.read_u16()? as usize;
        let mut shape_elements = Vec::with_capacity(count);
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            let flags = r.read_u32()?;
            let cardinality_byte = r.read_u8()?;
            let cardinality = Cardinality::from_u8(cardinality_byte).ok_or_else(|| {
                PeridotError::MalformedDescriptor(format!(
                    "invalid shape element cardinality 0x{cardinality_byte:02x}"
                ))
            })?;
            let name = r.read_string()?;
            let pos = r.read_u16()?;
            shape_elements.push(ShapeElement {
                name,
                cardinality,
                implicit: flags & shape_flags::IMPLICIT != 0,
                is_link: flags & shape_flags::LINK != 0,
                is_link_property: flags & shape_flags::LINK_PROPERTY != 0,
            });
            elements.push(self.resolve(slots, pos)?);
        }
        Ok((
            ObjectShape {
                elements: shape_elements,
            },
            elements,
        ))
    }
}
