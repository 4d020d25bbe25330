// src/errors.rs

//! Defines the primary error type for the entire driver.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = PeridotError> = std::result::Result<T, E>;

/// Broad classification of a failure, used by callers that only care about
/// the family of an error rather than its exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// TCP/TLS failures, EOF mid-frame, connect timeouts.
    Transport,
    /// Unexpected frames, malformed descriptors, version mismatches.
    Protocol,
    /// SASL failures and credential rejection.
    Authentication,
    /// An `ErrorResponse` reported by the server.
    Execution,
    /// Driver misuse: argument shape mismatch, handle reuse, nested work.
    Client,
    /// The operation was cancelled through its cancellation token.
    Cancellation,
}

/// Server-assigned error code space. Codes are hierarchical by byte: the
/// high byte selects the category, lower bytes refine it.
pub mod codes {
    pub const PROTOCOL_ERROR: u32 = 0x0100_0000;
    /// The cached input codec no longer matches the query; re-parse once.
    pub const PARAMETER_TYPE_MISMATCH: u32 = 0x0103_0000;
    /// The shipped session state does not match the server's expectation.
    pub const STATE_MISMATCH: u32 = 0x0104_0000;
    pub const QUERY_ERROR: u32 = 0x0300_0000;
    pub const INVALID_VALUE: u32 = 0x0400_0000;
    pub const TRANSACTION_CONFLICT: u32 = 0x0500_0000;
    pub const TRANSACTION_SERIALIZATION: u32 = 0x0501_0000;
    pub const AVAILABILITY_ERROR: u32 = 0x0600_0000;
    pub const BACKEND_UNAVAILABLE: u32 = 0x0700_0000;
    pub const ACCESS_ERROR: u32 = 0x0800_0000;
    pub const INTERNAL_SERVER_ERROR: u32 = 0xFF00_0000;

    /// True if the category of `code` marks a transient failure that the
    /// transaction retry loop may re-attempt.
    pub fn is_retryable(code: u32) -> bool {
        matches!(code >> 24, 0x05 | 0x06 | 0x07)
    }

    /// True if `code` signals that cached codecs or shipped state are stale
    /// and the request should be re-prepared once.
    pub fn needs_reparse(code: u32) -> bool {
        code & 0xFFFF_0000 == PARAMETER_TYPE_MISMATCH || code & 0xFFFF_0000 == STATE_MISMATCH
    }
}

/// A structured error reported by the server in an `ErrorResponse` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Severity byte as sent by the server (error/fatal/panic).
    pub severity: u8,
    /// Hierarchical error code; see [`codes`].
    pub code: u32,
    /// Human-readable message.
    pub message: String,
    /// Named attributes such as `hint` or `details`.
    pub attributes: BTreeMap<String, String>,
}

impl ServerError {
    pub fn hint(&self) -> Option<&str> {
        self.attributes.get("hint").map(String::as_str)
    }

    pub fn details(&self) -> Option<&str> {
        self.attributes.get("details").map(String::as_str)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[0x{:08x}] {}", self.code, self.message)
    }
}

/// The main error enum, representing all possible failures within the driver.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug)]
pub enum PeridotError {
    // --- Transport ---
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("TLS Error: {0}")]
    Tls(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Timed out waiting for the server")]
    ConnectionTimeout,

    // --- Protocol ---
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unexpected message '{got}' while waiting for '{expected}'")]
    UnexpectedMessage { expected: &'static str, got: String },

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Malformed type descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("Server requested protocol version {major}.{minor}, which is out of the supported range")]
    VersionMismatch { major: u16, minor: u16 },

    // --- Authentication ---
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Server offered no supported SASL mechanism (offered: {0})")]
    UnsupportedSaslMechanism(String),

    // --- Execution ---
    #[error("Server error: {0}")]
    Server(ServerError),

    // --- Client misuse ---
    #[error("Argument mismatch: {0}")]
    ArgumentMismatch(String),

    #[error("Failed to decode result: {0}")]
    DecodeError(String),

    #[error("Query returned no data where exactly one result was required")]
    NoDataReturned,

    #[error("Query returned more than one result where at most one was expected")]
    TooManyResults,

    #[error("Transaction handle used after its callback returned")]
    TransactionClosed,

    #[error("The client pool has been closed")]
    PoolClosed,

    #[error("Timed out acquiring a connection from the pool")]
    AcquireTimeout,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    // --- Cancellation ---
    #[error("Operation cancelled")]
    Cancelled,
}

impl PeridotError {
    /// The broad family of this error. Transport and protocol errors poison
    /// their connection; execution errors may be retryable.
    pub fn kind(&self) -> ErrorKind {
        use PeridotError::*;
        match self {
            Io(_) | Tls(_) | ConnectionClosed | ConnectionTimeout => ErrorKind::Transport,
            ProtocolViolation(_)
            | UnexpectedMessage { .. }
            | IncompleteData
            | MalformedDescriptor(_)
            | VersionMismatch { .. } => ErrorKind::Protocol,
            AuthenticationFailed(_) | UnsupportedSaslMechanism(_) => ErrorKind::Authentication,
            Server(_) => ErrorKind::Execution,
            ArgumentMismatch(_) | DecodeError(_) | NoDataReturned | TooManyResults
            | TransactionClosed | PoolClosed | AcquireTimeout | Unsupported(_) => ErrorKind::Client,
            Cancelled => ErrorKind::Cancellation,
        }
    }

    /// True if the transaction retry loop (or an idempotent read) may
    /// re-attempt the operation. Network failures before the first data
    /// frame and transient server categories qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            PeridotError::Server(e) => codes::is_retryable(e.code),
            PeridotError::Io(_)
            | PeridotError::ConnectionClosed
            | PeridotError::ConnectionTimeout => true,
            _ => false,
        }
    }

    /// True if the error poisons its connection: the pool must destroy the
    /// connection instead of reusing it.
    pub fn poisons_connection(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
    }

    /// True if the failure indicates stale cached codecs or session state;
    /// the command cycle re-prepares exactly once on this signal.
    pub fn needs_reparse(&self) -> bool {
        matches!(self, PeridotError::Server(e) if codes::needs_reparse(e.code))
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for PeridotError {
    fn clone(&self) -> Self {
        use PeridotError::*;
        match self {
            Io(e) => Io(Arc::clone(e)),
            Tls(s) => Tls(s.clone()),
            ConnectionClosed => ConnectionClosed,
            ConnectionTimeout => ConnectionTimeout,
            ProtocolViolation(s) => ProtocolViolation(s.clone()),
            UnexpectedMessage { expected, got } => UnexpectedMessage {
                expected,
                got: got.clone(),
            },
            IncompleteData => IncompleteData,
            MalformedDescriptor(s) => MalformedDescriptor(s.clone()),
            VersionMismatch { major, minor } => VersionMismatch {
                major: *major,
                minor: *minor,
            },
            AuthenticationFailed(s) => AuthenticationFailed(s.clone()),
            UnsupportedSaslMechanism(s) => UnsupportedSaslMechanism(s.clone()),
            Server(e) => Server(e.clone()),
            ArgumentMismatch(s) => ArgumentMismatch(s.clone()),
            DecodeError(s) => DecodeError(s.clone()),
            NoDataReturned => NoDataReturned,
            TooManyResults => TooManyResults,
            TransactionClosed => TransactionClosed,
            PoolClosed => PoolClosed,
            AcquireTimeout => AcquireTimeout,
            Unsupported(s) => Unsupported(s.clone()),
            Cancelled => Cancelled,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for PeridotError {
    fn from(e: std::io::Error) -> Self {
        PeridotError::Io(Arc::new(e))
    }
}

impl From<rustls::Error> for PeridotError {
    fn from(e: rustls::Error) -> Self {
        PeridotError::Tls(e.to_string())
    }
}

impl From<std::str::Utf8Error> for PeridotError {
    fn from(e: std::str::Utf8Error) -> Self {
        PeridotError::ProtocolViolation(format!("invalid UTF-8 in frame: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for PeridotError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        PeridotError::ProtocolViolation(format!("invalid UTF-8 in frame: {e}"))
    }
}

impl From<ServerError> for PeridotError {
    fn from(e: ServerError) -> Self {
        PeridotError::Server(e)
    }
}
