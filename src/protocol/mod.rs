// src/protocol/mod.rs

//! The binary wire protocol: message framing, typed client/server messages,
//! and the primitive packet reader/writer they are built on.
//!
//! Every message on the wire is a single type tag byte followed by a 32-bit
//! big-endian length covering the remainder of the message (the length field
//! includes its own four bytes, not the tag).

pub mod client;
pub mod frame;
pub mod packet;
pub mod server;

pub use client::ClientMessage;
pub use frame::{ClientSideCodec, MAX_FRAME_SIZE};
pub use packet::{PacketReader, PacketWriter};
pub use server::ServerMessage;

/// Protocol version pair as negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Highest version this driver speaks.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 2, minor: 0 };
    /// Lowest version this driver accepts after a server downgrade.
    pub const MINIMUM: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    pub fn is_supported(&self) -> bool {
        *self >= Self::MINIMUM && *self <= Self::CURRENT
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// ALPN protocol name presented during the TLS handshake.
pub const ALPN_PROTOCOL: &[u8] = b"edgedb-binary";

/// Message type tags, client to server.
pub mod client_tags {
    pub const CLIENT_HANDSHAKE: u8 = 0x56; // 'V'
    pub const AUTH_SASL_INITIAL_RESPONSE: u8 = 0x70; // 'p'
    pub const AUTH_SASL_RESPONSE: u8 = 0x72; // 'r'
    pub const PARSE: u8 = 0x50; // 'P'
    pub const EXECUTE: u8 = 0x4f; // 'O'
    pub const SYNC: u8 = 0x53; // 'S'
    pub const FLUSH: u8 = 0x48; // 'H'
    pub const TERMINATE: u8 = 0x58; // 'X'
    pub const DUMP: u8 = 0x3e; // '>'
    pub const RESTORE: u8 = 0x3c; // '<'
    pub const RESTORE_BLOCK: u8 = 0x3d; // '='
    pub const RESTORE_EOF: u8 = 0x2e; // '.'
}

/// Message type tags, server to client.
pub mod server_tags {
    pub const SERVER_HANDSHAKE: u8 = 0x76; // 'v'
    pub const AUTHENTICATION: u8 = 0x52; // 'R'
    pub const SERVER_KEY_DATA: u8 = 0x4b; // 'K'
    pub const PARAMETER_STATUS: u8 = 0x53; // 'S'
    pub const STATE_DATA_DESCRIPTION: u8 = 0x73; // 's'
    pub const COMMAND_DATA_DESCRIPTION: u8 = 0x54; // 'T'
    pub const DATA: u8 = 0x44; // 'D'
    pub const COMMAND_COMPLETE: u8 = 0x43; // 'C'
    pub const READY_FOR_COMMAND: u8 = 0x5a; // 'Z'
    pub const ERROR_RESPONSE: u8 = 0x45; // 'E'
    pub const LOG_MESSAGE: u8 = 0x4c; // 'L'
    pub const DUMP_HEADER: u8 = 0x40; // '@'
    pub const DUMP_BLOCK: u8 = 0x3d; // '='
    pub const RESTORE_READY: u8 = 0x2b; // '+'
}

bitflags::bitflags! {
    /// Capability bits a request advertises; the server rejects requests
    /// whose query needs a capability outside the advertised set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u64 {
        const MODIFICATIONS = 1 << 0;
        const SESSION_CONFIG = 1 << 1;
        const TRANSACTION = 1 << 2;
        const DDL = 1 << 3;
        const PERSISTENT_CONFIG = 1 << 4;
        const ALL = (1 << 5) - 1;
    }
}

/// Expected result multiplicity of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cardinality {
    NoResult = 0x6e,   // 'n'
    AtMostOne = 0x6f,  // 'o'
    One = 0x41,        // 'A'
    Many = 0x6d,       // 'm'
    AtLeastOne = 0x4d, // 'M'
}

impl Cardinality {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x6e => Some(Cardinality::NoResult),
            0x6f => Some(Cardinality::AtMostOne),
            0x41 => Some(Cardinality::One),
            0x6d => Some(Cardinality::Many),
            0x4d => Some(Cardinality::AtLeastOne),
            _ => None,
        }
    }
}

/// Requested wire encoding of query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OutputFormat {
    Binary = 0x62, // 'b'
    Json = 0x6a,   // 'j'
    None = 0x6e,   // 'n'
}

impl OutputFormat {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x62 => Some(OutputFormat::Binary),
            0x6a => Some(OutputFormat::Json),
            0x6e => Some(OutputFormat::None),
            _ => None,
        }
    }
}

/// Transaction status byte carried by `ReadyForCommand`. This is the
/// authoritative view used by the pool and the transaction logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionStatus {
    NotInTransaction = 0x49,    // 'I'
    InTransaction = 0x54,       // 'T'
    InFailedTransaction = 0x45, // 'E'
}

impl TransactionStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x49 => Some(TransactionStatus::NotInTransaction),
            0x54 => Some(TransactionStatus::InTransaction),
            0x45 => Some(TransactionStatus::InFailedTransaction),
            _ => None,
        }
    }
}
