// src/protocol/client.rs

//! Client-to-server messages: typed structs plus their payload
//! encoding/decoding. Decoding exists so the other side of the wire can be
//! exercised in tests without a live server.

use bytes::Bytes;
use uuid::Uuid;

use super::packet::{PacketReader, PacketWriter};
use super::{Capabilities, Cardinality, OutputFormat, client_tags as tags};
use crate::errors::{PeridotError, Result};

/// The `Parse` request: compile a query and return its input/output type
/// descriptors without executing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Parse {
    pub annotations: Vec<(String, String)>,
    pub allowed_capabilities: Capabilities,
    pub compilation_flags: u64,
    pub implicit_limit: u64,
    pub output_format: OutputFormat,
    pub expected_cardinality: Cardinality,
    pub command_text: String,
    pub state_typedesc_id: Uuid,
    pub state_data: Bytes,
}

/// The `Execute` request: run a query whose codec pair is already known
/// (either from a preceding `Parse` or from the query cache).
#[derive(Debug, Clone, PartialEq)]
pub struct Execute {
    pub annotations: Vec<(String, String)>,
    pub allowed_capabilities: Capabilities,
    pub compilation_flags: u64,
    pub implicit_limit: u64,
    pub output_format: OutputFormat,
    pub expected_cardinality: Cardinality,
    pub command_text: String,
    pub state_typedesc_id: Uuid,
    pub state_data: Bytes,
    pub input_typedesc_id: Uuid,
    pub output_typedesc_id: Uuid,
    pub arguments: Bytes,
}

/// All messages the client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    ClientHandshake {
        major: u16,
        minor: u16,
        params: Vec<(String, String)>,
        extensions: Vec<(String, Vec<(String, String)>)>,
    },
    AuthenticationSaslInitialResponse {
        method: String,
        data: Bytes,
    },
    AuthenticationSaslResponse {
        data: Bytes,
    },
    Parse(Parse),
    Execute(Execute),
    Sync,
    Flush,
    Terminate,
    Dump {
        annotations: Vec<(String, String)>,
    },
    Restore {
        jobs: u16,
        header_data: Bytes,
    },
    RestoreBlock {
        data: Bytes,
    },
    RestoreEof,
}

impl ClientMessage {
    /// The frame type tag for this message.
    pub fn tag(&self) -> u8 {
        match self {
            ClientMessage::ClientHandshake { .. } => tags::CLIENT_HANDSHAKE,
            ClientMessage::AuthenticationSaslInitialResponse { .. } => {
                tags::AUTH_SASL_INITIAL_RESPONSE
            }
            ClientMessage::AuthenticationSaslResponse { .. } => tags::AUTH_SASL_RESPONSE,
            ClientMessage::Parse(_) => tags::PARSE,
            ClientMessage::Execute(_) => tags::EXECUTE,
            ClientMessage::Sync => tags::SYNC,
            ClientMessage::Flush => tags::FLUSH,
            ClientMessage::Terminate => tags::TERMINATE,
            ClientMessage::Dump { .. } => tags::DUMP,
            ClientMessage::Restore { .. } => tags::RESTORE,
            ClientMessage::RestoreBlock { .. } => tags::RESTORE_BLOCK,
            ClientMessage::RestoreEof => tags::RESTORE_EOF,
        }
    }

    /// Encodes the message payload (everything after the tag and length).
    pub fn encode_payload(&self, w: &mut PacketWriter) {
        match self {
            ClientMessage::ClientHandshake {
                major,
                minor,
                params,
                extensions,
            } => {
                w.write_u16(*major);
                w.write_u16(*minor);
                w.write_u16(params.len() as u16);
                for (name, value) in params {
                    w.write_string(name);
                    w.write_string(value);
                }
                w.write_u16(extensions.len() as u16);
                for (name, annotations) in extensions {
                    w.write_string(name);
                    w.write_headers(annotations);
                }
            }
            ClientMessage::AuthenticationSaslInitialResponse { method, data } => {
                w.write_string(method);
                w.write_bytes(data);
            }
            ClientMessage::AuthenticationSaslResponse { data } => {
                w.write_bytes(data);
            }
            ClientMessage::Parse(parse) => {
                w.write_headers(&parse.annotations);
                w.write_u64(parse.allowed_capabilities.bits());
                w.write_u64(parse.compilation_flags);
                w.write_u64(parse.implicit_limit);
                w.write_u8(parse.output_format as u8);
                w.write_u8(parse.expected_cardinality as u8);
                w.write_string(&parse.command_text);
                w.write_uuid(&parse.state_typedesc_id);
                w.write_bytes(&parse.state_data);
            }
            ClientMessage::Execute(execute) => {
                w.write_headers(&execute.annotations);
                w.write_u64(execute.allowed_capabilities.bits());
                w.write_u64(execute.compilation_flags);
                w.write_u64(execute.implicit_limit);
                w.write_u8(execute.output_format as u8);
                w.write_u8(execute.expected_cardinality as u8);
                w.write_string(&execute.command_text);
                w.write_uuid(&execute.state_typedesc_id);
                w.write_bytes(&execute.state_data);
                w.write_uuid(&execute.input_typedesc_id);
                w.write_uuid(&execute.output_typedesc_id);
                w.write_bytes(&execute.arguments);
            }
            ClientMessage::Sync | ClientMessage::Flush | ClientMessage::Terminate => {}
            ClientMessage::Dump { annotations } => {
                w.write_headers(annotations);
            }
            ClientMessage::Restore { jobs, header_data } => {
                w.write_u16(*jobs);
                w.write_bytes(header_data);
            }
            ClientMessage::RestoreBlock { data } => {
                w.write_bytes(data);
            }
            ClientMessage::RestoreEof => {}
        }
    }

    /// Decodes a message payload for the given tag. The reader must contain
    /// exactly the payload.
    pub fn decode_payload(tag: u8, r: &mut PacketReader<'_>) -> Result<ClientMessage> {
        let message = match tag {
            tags::CLIENT_HANDSHAKE => {
                let major = r.read_u16()?;
                let minor = r.read_u16()?;
                let nparams = r.read_u16()? as usize;
                let mut params = Vec::with_capacity(nparams);
                for _ in 0..nparams {
                    let name = r.read_string()?;
                    let value = r.read_string()?;
                    params.push((name, value));
                }
                let nexts = r.read_u16()? as usize;
                let mut extensions = Vec::with_capacity(nexts);
                for _ in 0..nexts {
                    let name = r.read_string()?;
                    let annotations = r.read_headers()?;
                    extensions.push((name, annotations));
                }
                ClientMessage::ClientHandshake {
                    major,
                    minor,
                    params,
                    extensions,
                }
            }
            tags::AUTH_SASL_INITIAL_RESPONSE => ClientMessage::AuthenticationSaslInitialResponse {
                method: r.read_string()?,
                data: r.read_bytes()?,
            },
            tags::AUTH_SASL_RESPONSE => ClientMessage::AuthenticationSaslResponse {
                data: r.read_bytes()?,
            },
            tags::PARSE => {
                let annotations = r.read_headers()?;
                let allowed_capabilities = Capabilities::from_bits_truncate(r.read_u64()?);
                let compilation_flags = r.read_u64()?;
                let implicit_limit = r.read_u64()?;
                let output_format = decode_output_format(r.read_u8()?)?;
                let expected_cardinality = decode_cardinality(r.read_u8()?)?;
                let command_text = r.read_string()?;
                let state_typedesc_id = r.read_uuid()?;
                let state_data = r.read_bytes()?;
                ClientMessage::Parse(Parse {
                    annotations,
                    allowed_capabilities,
                    compilation_flags,
                    implicit_limit,
                    output_format,
                    expected_cardinality,
                    command_text,
                    state_typedesc_id,
                    state_data,
                })
            }
            tags::EXECUTE => {
                let annotations = r.read_headers()?;
                let allowed_capabilities = Capabilities::from_bits_truncate(r.read_u64()?);
                let compilation_flags = r.read_u64()?;
                let implicit_limit = r.read_u64()?;
                let output_format = decode_output_format(r.read_u8()?)?;
                let expected_cardinality = decode_cardinality(r.read_u8()?)?;
                let command_text = r.read_string()?;
                let state_typedesc_id = r.read_uuid()?;
                let state_data = r.read_bytes()?;
                let input_typedesc_id = r.read_uuid()?;
                let output_typedesc_id = r.read_uuid()?;
                let arguments = r.read_bytes()?;
                ClientMessage::Execute(Execute {
                    annotations,
                    allowed_capabilities,
                    compilation_flags,
                    implicit_limit,
                    output_format,
                    expected_cardinality,
                    command_text,
                    state_typedesc_id,
                    state_data,
                    input_typedesc_id,
                    output_typedesc_id,
                    arguments,
                })
            }
            tags::SYNC => ClientMessage::Sync,
            tags::FLUSH => ClientMessage::Flush,
            tags::TERMINATE => ClientMessage::Terminate,
            tags::DUMP => ClientMessage::Dump {
                annotations: r.read_headers()?,
            },
            tags::RESTORE => ClientMessage::Restore {
                jobs: r.read_u16()?,
                header_data: r.read_bytes()?,
            },
            tags::RESTORE_BLOCK => ClientMessage::RestoreBlock {
                data: r.read_bytes()?,
            },
            tags::RESTORE_EOF => ClientMessage::RestoreEof,
            other => {
                return Err(PeridotError::ProtocolViolation(format!(
                    "unknown client message tag 0x{other:02x}"
                )));
            }
        };
        r.expect_end("client message payload")?;
        Ok(message)
    }
}

fn decode_output_format(value: u8) -> Result<OutputFormat> {
    OutputFormat::from_u8(value).ok_or_else(|| {
        PeridotError::ProtocolViolation(format!("unknown output format 0x{value:02x}"))
    })
}

fn decode_cardinality(value: u8) -> Result<Cardinality> {
    Cardinality::from_u8(value).ok_or_else(|| {
        PeridotError::ProtocolViolation(format!("unknown cardinality 0x{value:02x}"))
    })
}
