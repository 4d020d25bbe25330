// src/protocol/packet.rs

//! Primitive binary reads and writes shared by the message layer and the
//! codec system. All integers are big-endian on the wire.

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::errors::{PeridotError, Result};

/// Sequential reader over a byte slice. Every read checks the remaining
/// length and fails with [`PeridotError::IncompleteData`] on underflow
/// rather than panicking.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(PeridotError::IncompleteData);
        }
        Ok(())
    }

    #[inline]
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let slice = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// A UUID is 16 raw bytes, no length prefix.
    pub fn read_uuid(&mut self) -> Result<Uuid> {
        let bytes: [u8; 16] = self.take(16)?.try_into().unwrap();
        Ok(Uuid::from_bytes(bytes))
    }

    /// UTF-8 string with a 32-bit byte-length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    /// Byte blob with a 32-bit length prefix.
    pub fn read_bytes(&mut self) -> Result<Bytes> {
        let len = self.read_u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    /// Raw bytes without a length prefix.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Header map: 16-bit count, then (name, value) string pairs.
    pub fn read_headers(&mut self) -> Result<Vec<(String, String)>> {
        let count = self.read_u16()? as usize;
        let mut headers = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_string()?;
            let value = self.read_string()?;
            headers.push((name, value));
        }
        Ok(headers)
    }

    /// The rest of the buffer as a single slice, consuming it.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.offset..];
        self.offset = self.buf.len();
        slice
    }

    /// Fails unless the reader consumed the entire buffer, guarding against
    /// trailing garbage in a frame.
    pub fn expect_end(&self, context: &str) -> Result<()> {
        if self.remaining() != 0 {
            return Err(PeridotError::ProtocolViolation(format!(
                "{} bytes left over after {context}",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Sequential writer into a growable buffer, mirroring [`PacketReader`].
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.extend_from_slice(&[v]);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_uuid(&mut self, v: &Uuid) {
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn write_string(&mut self, v: &str) {
        self.write_u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn write_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_headers(&mut self, headers: &[(String, String)]) {
        self.write_u16(headers.len() as u16);
        for (name, value) in headers {
            self.write_string(name);
            self.write_string(value);
        }
    }

    /// Reserves a 32-bit length slot and returns its position for
    /// [`PacketWriter::backfill_length`]. Used for element envelopes whose
    /// length is only known after the body is written.
    pub fn begin_length(&mut self) -> usize {
        let pos = self.buf.len();
        self.write_u32(0);
        pos
    }

    /// Writes `len(buffer) - pos - 4` into the slot reserved at `pos`.
    pub fn backfill_length(&mut self, pos: usize) {
        let len = (self.buf.len() - pos - 4) as u32;
        self.buf[pos..pos + 4].copy_from_slice(&len.to_be_bytes());
    }
}
