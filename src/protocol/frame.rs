// src/protocol/frame.rs

//! `tokio_util::codec` implementation for the wire framing: one type tag
//! byte, a 32-bit big-endian length covering the remainder (including the
//! length field itself), then the payload.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::packet::{PacketReader, PacketWriter};
use super::{ClientMessage, ServerMessage};
use crate::errors::PeridotError;

/// Upper bound on a single frame, guarding against a desynchronized or
/// malicious peer. Dump blocks are the largest legitimate frames.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

const HEADER_LEN: usize = 5;

/// Assembles a complete frame from a tag and an encoded payload.
pub fn frame_bytes(tag: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&[tag]);
    buf.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Splits one frame off the front of `src` if a complete one is buffered.
/// Returns the tag and payload without copying the payload.
pub fn split_frame(src: &mut BytesMut) -> Result<Option<(u8, Bytes)>, PeridotError> {
    if src.len() < HEADER_LEN {
        return Ok(None);
    }
    let tag = src[0];
    let len = u32::from_be_bytes(src[1..5].try_into().unwrap()) as usize;
    if len < 4 {
        return Err(PeridotError::ProtocolViolation(format!(
            "frame length {len} is shorter than its own length field"
        )));
    }
    let total = 1 + len;
    if total > 1 + MAX_FRAME_SIZE {
        return Err(PeridotError::ProtocolViolation(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
        )));
    }
    if src.len() < total {
        // Incomplete; reserve so the next read can fill the rest in one go.
        src.reserve(total - src.len());
        return Ok(None);
    }
    src.advance(HEADER_LEN);
    let payload = src.split_to(len - 4).freeze();
    Ok(Some((tag, payload)))
}

/// The codec installed on the driver side of the connection: encodes
/// [`ClientMessage`]s, decodes [`ServerMessage`]s.
#[derive(Debug, Default)]
pub struct ClientSideCodec;

impl Encoder<ClientMessage> for ClientSideCodec {
    type Error = PeridotError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut payload = PacketWriter::new();
        item.encode_payload(&mut payload);
        let payload = payload.into_bytes();
        dst.reserve(HEADER_LEN + payload.len());
        dst.extend_from_slice(&[item.tag()]);
        dst.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Decoder for ClientSideCodec {
    type Item = ServerMessage;
    type Error = PeridotError;

    /// Returns `Ok(None)` until a complete frame is buffered, letting the
    /// `Framed` stream wait for more data from the network.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match split_frame(src)? {
            Some((tag, payload)) => {
                let mut reader = PacketReader::new(&payload);
                ServerMessage::decode_payload(tag, &mut reader).map(Some)
            }
            None => Ok(None),
        }
    }
}
