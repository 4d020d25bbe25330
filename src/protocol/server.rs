// src/protocol/server.rs

//! Server-to-client messages. Decoding is the hot path; encoding exists so
//! tests can stand up an in-process peer.

use std::collections::BTreeMap;

use bytes::Bytes;
use uuid::Uuid;

use super::packet::{PacketReader, PacketWriter};
use super::{Capabilities, Cardinality, TransactionStatus, server_tags as tags};
use crate::errors::{PeridotError, Result, ServerError};

/// Status values inside an `Authentication` message.
mod auth_status {
    pub const OK: u32 = 0x00;
    pub const SASL: u32 = 0x0a;
    pub const SASL_CONTINUE: u32 = 0x0b;
    pub const SASL_FINAL: u32 = 0x0c;
}

/// The authentication sub-protocol states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Ok,
    Sasl { methods: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
}

/// Severity of a server [`LogMessage`](ServerMessage::LogMessage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageSeverity {
    Debug = 20,
    Info = 40,
    Notice = 60,
    Warning = 80,
}

impl MessageSeverity {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0..=20 => MessageSeverity::Debug,
            21..=40 => MessageSeverity::Info,
            41..=60 => MessageSeverity::Notice,
            _ => MessageSeverity::Warning,
        }
    }
}

/// All messages the server can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ServerHandshake {
        major: u16,
        minor: u16,
        extensions: Vec<(String, Vec<(String, String)>)>,
    },
    Authentication(Authentication),
    ServerKeyData {
        data: [u8; 32],
    },
    ParameterStatus {
        name: String,
        value: Bytes,
    },
    StateDataDescription {
        typedesc_id: Uuid,
        typedesc: Bytes,
    },
    CommandDataDescription {
        annotations: Vec<(String, String)>,
        capabilities: Capabilities,
        result_cardinality: Cardinality,
        input_typedesc_id: Uuid,
        input_typedesc: Bytes,
        output_typedesc_id: Uuid,
        output_typedesc: Bytes,
    },
    Data {
        chunks: Vec<Bytes>,
    },
    CommandComplete {
        annotations: Vec<(String, String)>,
        capabilities: Capabilities,
        status: String,
        state_typedesc_id: Uuid,
        state_data: Bytes,
    },
    ReadyForCommand {
        annotations: Vec<(String, String)>,
        transaction_status: TransactionStatus,
    },
    ErrorResponse(ServerError),
    LogMessage {
        severity: MessageSeverity,
        code: u32,
        text: String,
        annotations: Vec<(String, String)>,
    },
    DumpHeader {
        attributes: Vec<(String, Bytes)>,
        major: u16,
        minor: u16,
    },
    DumpBlock {
        data: Bytes,
    },
    RestoreReady {
        annotations: Vec<(String, String)>,
        jobs: u16,
    },
}

impl ServerMessage {
    /// Short human name used in "unexpected message" errors.
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::ServerHandshake { .. } => "ServerHandshake",
            ServerMessage::Authentication(_) => "Authentication",
            ServerMessage::ServerKeyData { .. } => "ServerKeyData",
            ServerMessage::ParameterStatus { .. } => "ParameterStatus",
            ServerMessage::StateDataDescription { .. } => "StateDataDescription",
            ServerMessage::CommandDataDescription { .. } => "CommandDataDescription",
            ServerMessage::Data { .. } => "Data",
            ServerMessage::CommandComplete { .. } => "CommandComplete",
            ServerMessage::ReadyForCommand { .. } => "ReadyForCommand",
            ServerMessage::ErrorResponse(_) => "ErrorResponse",
            ServerMessage::LogMessage { .. } => "LogMessage",
            ServerMessage::DumpHeader { .. } => "DumpHeader",
            ServerMessage::DumpBlock { .. } => "DumpBlock",
            ServerMessage::RestoreReady { .. } => "RestoreReady",
        }
    }

    /// The frame type tag for this message.
    pub fn tag(&self) -> u8 {
        match self {
            ServerMessage::ServerHandshake { .. } => tags::SERVER_HANDSHAKE,
            ServerMessage::Authentication(_) => tags::AUTHENTICATION,
            ServerMessage::ServerKeyData { .. } => tags::SERVER_KEY_DATA,
            ServerMessage::ParameterStatus { .. } => tags::PARAMETER_STATUS,
            ServerMessage::StateDataDescription { .. } => tags::STATE_DATA_DESCRIPTION,
            ServerMessage::CommandDataDescription { .. } => tags::COMMAND_DATA_DESCRIPTION,
            ServerMessage::Data { .. } => tags::DATA,
            ServerMessage::CommandComplete { .. } => tags::COMMAND_COMPLETE,
            ServerMessage::ReadyForCommand { .. } => tags::READY_FOR_COMMAND,
            ServerMessage::ErrorResponse(_) => tags::ERROR_RESPONSE,
            ServerMessage::LogMessage { .. } => tags::LOG_MESSAGE,
            ServerMessage::DumpHeader { .. } => tags::DUMP_HEADER,
            ServerMessage::DumpBlock { .. } => tags::DUMP_BLOCK,
            ServerMessage::RestoreReady { .. } => tags::RESTORE_READY,
        }
    }

    /// Decodes a message payload for the given tag.
    pub fn decode_payload(tag: u8, r: &mut PacketReader<'_>) -> Result<ServerMessage> {
        let message = match tag {
            tags::SERVER_HANDSHAKE => {
                let major = r.read_u16()?;
                let minor = r.read_u16()?;
                let nexts = r.read_u16()? as usize;
                let mut extensions = Vec::with_capacity(nexts);
                for _ in 0..nexts {
                    let name = r.read_string()?;
                    let annotations = r.read_headers()?;
                    extensions.push((name, annotations));
                }
                ServerMessage::ServerHandshake {
                    major,
                    minor,
                    extensions,
                }
            }
            tags::AUTHENTICATION => {
                let status = r.read_u32()?;
                let auth = match status {
                    auth_status::OK => Authentication::Ok,
                    auth_status::SASL => {
                        let count = r.read_u32()? as usize;
                        let mut methods = Vec::with_capacity(count);
                        for _ in 0..count {
                            methods.push(r.read_string()?);
                        }
                        Authentication::Sasl { methods }
                    }
                    auth_status::SASL_CONTINUE => Authentication::SaslContinue {
                        data: r.read_bytes()?,
                    },
                    auth_status::SASL_FINAL => Authentication::SaslFinal {
                        data: r.read_bytes()?,
                    },
                    other => {
                        return Err(PeridotError::ProtocolViolation(format!(
                            "unknown authentication status 0x{other:02x}"
                        )));
                    }
                };
                ServerMessage::Authentication(auth)
            }
            tags::SERVER_KEY_DATA => {
                let data: [u8; 32] = r.read_raw(32)?.try_into().unwrap();
                ServerMessage::ServerKeyData { data }
            }
            tags::PARAMETER_STATUS => ServerMessage::ParameterStatus {
                name: r.read_string()?,
                value: r.read_bytes()?,
            },
            tags::STATE_DATA_DESCRIPTION => ServerMessage::StateDataDescription {
                typedesc_id: r.read_uuid()?,
                typedesc: r.read_bytes()?,
            },
            tags::COMMAND_DATA_DESCRIPTION => {
                let annotations = r.read_headers()?;
                let capabilities = Capabilities::from_bits_truncate(r.read_u64()?);
                let cardinality_byte = r.read_u8()?;
                let result_cardinality =
                    Cardinality::from_u8(cardinality_byte).ok_or_else(|| {
                        PeridotError::ProtocolViolation(format!(
                            "unknown result cardinality 0x{cardinality_byte:02x}"
                        ))
                    })?;
                ServerMessage::CommandDataDescription {
                    annotations,
                    capabilities,
                    result_cardinality,
                    input_typedesc_id: r.read_uuid()?,
                    input_typedesc: r.read_bytes()?,
                    output_typedesc_id: r.read_uuid()?,
                    output_typedesc: r.read_bytes()?,
                }
            }
            tags::DATA => {
                let count = r.read_u16()? as usize;
                let mut chunks = Vec::with_capacity(count);
                for _ in 0..count {
                    chunks.push(r.read_bytes()?);
                }
                ServerMessage::Data { chunks }
            }
            tags::COMMAND_COMPLETE => ServerMessage::CommandComplete {
                annotations: r.read_headers()?,
                capabilities: Capabilities::from_bits_truncate(r.read_u64()?),
                status: r.read_string()?,
                state_typedesc_id: r.read_uuid()?,
                state_data: r.read_bytes()?,
            },
            tags::READY_FOR_COMMAND => {
                let annotations = r.read_headers()?;
                let status_byte = r.read_u8()?;
                let transaction_status =
                    TransactionStatus::from_u8(status_byte).ok_or_else(|| {
                        PeridotError::ProtocolViolation(format!(
                            "unknown transaction status 0x{status_byte:02x}"
                        ))
                    })?;
                ServerMessage::ReadyForCommand {
                    annotations,
                    transaction_status,
                }
            }
            tags::ERROR_RESPONSE => {
                let severity = r.read_u8()?;
                let code = r.read_u32()?;
                let message = r.read_string()?;
                let attributes: BTreeMap<String, String> =
                    r.read_headers()?.into_iter().collect();
                ServerMessage::ErrorResponse(ServerError {
                    severity,
                    code,
                    message,
                    attributes,
                })
            }
            tags::LOG_MESSAGE => ServerMessage::LogMessage {
                severity: MessageSeverity::from_u8(r.read_u8()?),
                code: r.read_u32()?,
                text: r.read_string()?,
                annotations: r.read_headers()?,
            },
            tags::DUMP_HEADER => {
                let count = r.read_u16()? as usize;
                let mut attributes = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = r.read_string()?;
                    let value = r.read_bytes()?;
                    attributes.push((name, value));
                }
                ServerMessage::DumpHeader {
                    attributes,
                    major: r.read_u16()?,
                    minor: r.read_u16()?,
                }
            }
            tags::DUMP_BLOCK => ServerMessage::DumpBlock {
                data: r.read_bytes()?,
            },
            tags::RESTORE_READY => ServerMessage::RestoreReady {
                annotations: r.read_headers()?,
                jobs: r.read_u16()?,
            },
            other => {
                return Err(PeridotError::ProtocolViolation(format!(
                    "unknown server message tag 0x{other:02x}"
                )));
            }
        };
        r.expect_end("server message payload")?;
        Ok(message)
    }

    /// Encodes the message payload (everything after the tag and length).
    pub fn encode_payload(&self, w: &mut PacketWriter) {
        match self {
            ServerMessage::ServerHandshake {
                major,
                minor,
                extensions,
            } => {
                w.write_u16(*major);
                w.write_u16(*minor);
                w.write_u16(extensions.len() as u16);
                for (name, annotations) in extensions {
                    w.write_string(name);
                    w.write_headers(annotations);
                }
            }
            ServerMessage::Authentication(auth) => match auth {
                Authentication::Ok => w.write_u32(auth_status::OK),
                Authentication::Sasl { methods } => {
                    w.write_u32(auth_status::SASL);
                    w.write_u32(methods.len() as u32);
                    for method in methods {
                        w.write_string(method);
                    }
                }
                Authentication::SaslContinue { data } => {
                    w.write_u32(auth_status::SASL_CONTINUE);
                    w.write_bytes(data);
                }
                Authentication::SaslFinal { data } => {
                    w.write_u32(auth_status::SASL_FINAL);
                    w.write_bytes(data);
                }
            },
            ServerMessage::ServerKeyData { data } => {
                w.write_raw(data);
            }
            ServerMessage::ParameterStatus { name, value } => {
                w.write_string(name);
                w.write_bytes(value);
            }
            ServerMessage::StateDataDescription {
                typedesc_id,
                typedesc,
            } => {
                w.write_uuid(typedesc_id);
                w.write_bytes(typedesc);
            }
            ServerMessage::CommandDataDescription {
                annotations,
                capabilities,
                result_cardinality,
                input_typedesc_id,
                input_typedesc,
                output_typedesc_id,
                output_typedesc,
            } => {
                w.write_headers(annotations);
                w.write_u64(capabilities.bits());
                w.write_u8(*result_cardinality as u8);
                w.write_uuid(input_typedesc_id);
                w.write_bytes(input_typedesc);
                w.write_uuid(output_typedesc_id);
                w.write_bytes(output_typedesc);
            }
            ServerMessage::Data { chunks } => {
                w.write_u16(chunks.len() as u16);
                for chunk in chunks {
                    w.write_bytes(chunk);
                }
            }
            ServerMessage::CommandComplete {
                annotations,
                capabilities,
                status,
                state_typedesc_id,
                state_data,
            } => {
                w.write_headers(annotations);
                w.write_u64(capabilities.bits());
                w.write_string(status);
                w.write_uuid(state_typedesc_id);
                w.write_bytes(state_data);
            }
            ServerMessage::ReadyForCommand {
                annotations,
                transaction_status,
            } => {
                w.write_headers(annotations);
                w.write_u8(*transaction_status as u8);
            }
            ServerMessage::ErrorResponse(error) => {
                w.write_u8(error.severity);
                w.write_u32(error.code);
                w.write_string(&error.message);
                let attributes: Vec<(String, String)> = error
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                w.write_headers(&attributes);
            }
            ServerMessage::LogMessage {
                severity,
                code,
                text,
                annotations,
            } => {
                w.write_u8(*severity as u8);
                w.write_u32(*code);
                w.write_string(text);
                w.write_headers(annotations);
            }
            ServerMessage::DumpHeader {
                attributes,
                major,
                minor,
            } => {
                w.write_u16(attributes.len() as u16);
                for (name, value) in attributes {
                    w.write_string(name);
                    w.write_bytes(value);
                }
                w.write_u16(*major);
                w.write_u16(*minor);
            }
            ServerMessage::DumpBlock { data } => {
                w.write_bytes(data);
            }
            ServerMessage::RestoreReady { annotations, jobs } => {
                w.write_headers(annotations);
                w.write_u16(*jobs);
            }
        }
    }
}
