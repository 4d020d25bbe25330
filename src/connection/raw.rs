// src/connection/raw.rs

//! The connection state machine: transport establishment, protocol
//! handshake, SCRAM authentication, and the steady-state frame plumbing
//! that the command cycle builds on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::lock::CommandLock;
use super::scram::{self, ScramClient};
use super::stream::{secure_stream, AnyStream};
use crate::codec::{self, Codec, DescriptorReader};
use crate::config::ConnectionConfig;
use crate::errors::{PeridotError, Result};
use crate::protocol::server::{Authentication, MessageSeverity};
use crate::protocol::{
    ClientMessage, ClientSideCodec, ProtocolVersion, ServerMessage, TransactionStatus,
};

/// `ParameterStatus` key carrying the server's preferred pool size.
const PARAM_SUGGESTED_POOL_SIZE: &str = "suggested_pool_concurrency";

/// Grace period for the best-effort `Terminate` on cancellation.
const TERMINATE_GRACE: Duration = Duration::from_millis(100);

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Handshaking,
    Authenticating,
    Ready,
    ExecutingCommand,
    Errored,
}

/// One authenticated, framed connection to the server.
pub struct RawConnection {
    pub(crate) framed: Framed<AnyStream, ClientSideCodec>,
    pub(crate) phase: ConnectionPhase,
    protocol: ProtocolVersion,
    pub(crate) transaction_status: TransactionStatus,
    server_key_data: Option<[u8; 32]>,
    server_params: HashMap<String, Bytes>,
    suggested_pool_size: Option<usize>,
    /// Descriptor id of the session-state shape the server expects.
    pub(crate) state_typedesc_id: Uuid,
    pub(crate) state_codec: Option<Arc<dyn Codec>>,
    /// Content hash of the most recently shipped state encoding.
    pub(crate) last_state_hash: Option<u64>,
    pub(crate) lock: CommandLock,
}

impl RawConnection {
    /// Dials, secures, handshakes, and authenticates a fresh connection,
    /// returning once the server reports `ReadyForCommand`.
    pub async fn connect(config: &ConnectionConfig, cancel: &CancellationToken) -> Result<Self> {
        debug!(host = %config.host, port = config.port, "connecting");

        let tcp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PeridotError::Cancelled),
            tcp = TcpStream::connect((config.host.as_str(), config.port)) => tcp?,
        };
        tcp.set_nodelay(true)?;

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PeridotError::Cancelled),
            stream = secure_stream(config, tcp) => stream?,
        };

        let mut conn = RawConnection {
            framed: Framed::new(stream, ClientSideCodec),
            phase: ConnectionPhase::Handshaking,
            protocol: ProtocolVersion::CURRENT,
            transaction_status: TransactionStatus::NotInTransaction,
            server_key_data: None,
            server_params: HashMap::new(),
            suggested_pool_size: None,
            state_typedesc_id: codec::ids::NULL,
            state_codec: None,
            last_state_hash: None,
            lock: CommandLock::new(),
        };

        conn.handshake(config, cancel).await.inspect_err(|e| {
            debug!(error = %e, "connection setup failed");
        })?;
        info!(
            host = %config.host,
            port = config.port,
            protocol = %conn.protocol,
            "connection ready"
        );
        Ok(conn)
    }

    async fn handshake(
        &mut self,
        config: &ConnectionConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let params = vec![
            ("user".to_string(), config.user.clone()),
            ("database".to_string(), config.database.clone()),
            ("branch".to_string(), config.effective_branch().to_string()),
        ];
        self.send(ClientMessage::ClientHandshake {
            major: ProtocolVersion::CURRENT.major,
            minor: ProtocolVersion::CURRENT.minor,
            params,
            extensions: Vec::new(),
        })
        .await?;

        // Handshake and authentication. The server may downgrade the
        // protocol version before asking for credentials.
        loop {
            match self.recv(cancel).await? {
                ServerMessage::ServerHandshake { major, minor, .. } => {
                    let proposed = ProtocolVersion { major, minor };
                    if !proposed.is_supported() {
                        self.phase = ConnectionPhase::Errored;
                        return Err(PeridotError::VersionMismatch { major, minor });
                    }
                    debug!(version = %proposed, "server negotiated protocol version");
                    self.protocol = proposed;
                }
                ServerMessage::Authentication(Authentication::Ok) => break,
                ServerMessage::Authentication(Authentication::Sasl { methods }) => {
                    self.phase = ConnectionPhase::Authenticating;
                    self.authenticate(config, methods, cancel).await?;
                    break;
                }
                ServerMessage::Authentication(other) => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "Authentication required or ok",
                        got: format!("{other:?}"),
                    });
                }
                ServerMessage::ErrorResponse(e) => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(if e.code >> 24 == 0x08 {
                        PeridotError::AuthenticationFailed(e.message)
                    } else {
                        PeridotError::Server(e)
                    });
                }
                other => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "ServerHandshake or Authentication",
                        got: other.name().to_string(),
                    });
                }
            }
        }

        // Server key data, parameters, and the initial state descriptor,
        // terminated by the first ReadyForCommand. ParameterStatus frames
        // are absorbed by the receive path itself.
        loop {
            match self.recv(cancel).await? {
                ServerMessage::ServerKeyData { data } => {
                    self.server_key_data = Some(data);
                }
                ServerMessage::StateDataDescription {
                    typedesc_id,
                    typedesc,
                } => {
                    self.install_state_descriptor(typedesc_id, &typedesc)?;
                }
                ServerMessage::ReadyForCommand {
                    transaction_status, ..
                } => {
                    self.transaction_status = transaction_status;
                    self.phase = ConnectionPhase::Ready;
                    return Ok(());
                }
                ServerMessage::ErrorResponse(e) => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::Server(e));
                }
                other => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "ReadyForCommand",
                        got: other.name().to_string(),
                    });
                }
            }
        }
    }

    async fn authenticate(
        &mut self,
        config: &ConnectionConfig,
        methods: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !methods.iter().any(|m| m == scram::MECHANISM) {
            return Err(PeridotError::UnsupportedSaslMechanism(methods.join(", ")));
        }
        let password = config.password.as_deref().unwrap_or("");
        let mut scram = ScramClient::new(&config.user, password);

        self.send(ClientMessage::AuthenticationSaslInitialResponse {
            method: scram::MECHANISM.to_string(),
            data: Bytes::from(scram.client_first()),
        })
        .await?;

        loop {
            match self.recv(cancel).await? {
                ServerMessage::Authentication(Authentication::SaslContinue { data }) => {
                    let server_first = std::str::from_utf8(&data)?;
                    let client_final = scram.client_final(server_first)?;
                    self.send(ClientMessage::AuthenticationSaslResponse {
                        data: Bytes::from(client_final),
                    })
                    .await?;
                }
                ServerMessage::Authentication(Authentication::SaslFinal { data }) => {
                    scram.verify_final(std::str::from_utf8(&data)?)?;
                }
                ServerMessage::Authentication(Authentication::Ok) => return Ok(()),
                ServerMessage::ErrorResponse(e) => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::AuthenticationFailed(e.message));
                }
                other => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "Authentication SASL continuation",
                        got: other.name().to_string(),
                    });
                }
            }
        }
    }

    /// Sends one message. A transport failure here poisons the connection.
    pub(crate) async fn send(&mut self, message: ClientMessage) -> Result<()> {
        trace!(tag = message.tag(), "sending frame");
        self.framed.send(message).await.inspect_err(|_| {
            self.phase = ConnectionPhase::Errored;
        })
    }

    /// Receives the next protocol-relevant message. In-band `LogMessage`
    /// frames are routed to the logger and `ParameterStatus` updates are
    /// absorbed here, so callers only ever see command-cycle messages.
    pub(crate) async fn recv(&mut self, cancel: &CancellationToken) -> Result<ServerMessage> {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.handle_cancellation().await;
                    return Err(PeridotError::Cancelled);
                }
                frame = self.framed.next() => match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        self.phase = ConnectionPhase::Errored;
                        return Err(e);
                    }
                    None => {
                        self.phase = ConnectionPhase::Errored;
                        return Err(PeridotError::ConnectionClosed);
                    }
                },
            };
            match message {
                ServerMessage::LogMessage {
                    severity,
                    code,
                    text,
                    ..
                } => {
                    route_log_message(severity, code, &text);
                }
                ServerMessage::ParameterStatus { name, value } => {
                    self.note_parameter(name, value);
                }
                other => {
                    trace!(message = other.name(), "received frame");
                    return Ok(other);
                }
            }
        }
    }

    /// Cancellation mid-command: past the handshake and between writes the
    /// connection can be shut down politely with a `Terminate`; anywhere
    /// else the stream may be desynchronized and is simply destroyed.
    async fn handle_cancellation(&mut self) {
        if matches!(
            self.phase,
            ConnectionPhase::Ready | ConnectionPhase::ExecutingCommand
        ) {
            let _ = tokio::time::timeout(
                TERMINATE_GRACE,
                self.framed.send(ClientMessage::Terminate),
            )
            .await;
        }
        self.phase = ConnectionPhase::Errored;
    }

    fn note_parameter(&mut self, name: String, value: Bytes) {
        if name == PARAM_SUGGESTED_POOL_SIZE
            && let Ok(text) = std::str::from_utf8(&value)
            && let Ok(size) = text.parse::<usize>()
        {
            self.suggested_pool_size = Some(size);
        }
        self.server_params.insert(name, value);
    }

    /// Builds and installs the sparse codec for session state.
    pub(crate) fn install_state_descriptor(
        &mut self,
        typedesc_id: Uuid,
        typedesc: &[u8],
    ) -> Result<()> {
        let registry = codec::registry::global();
        let codec = DescriptorReader::new(registry).build(typedesc_id, typedesc)?;
        debug!(id = %typedesc_id, "installed session state descriptor");
        self.state_typedesc_id = typedesc_id;
        self.state_codec = Some(codec);
        // The shape changed; whatever was shipped before no longer counts.
        self.last_state_hash = None;
        Ok(())
    }

    /// A connection is healthy iff it is `Ready` and not inside (or
    /// recovering from) a transaction.
    pub fn is_healthy(&self) -> bool {
        self.phase == ConnectionPhase::Ready
            && self.transaction_status == TransactionStatus::NotInTransaction
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn server_key_data(&self) -> Option<&[u8; 32]> {
        self.server_key_data.as_ref()
    }

    pub fn server_param(&self, name: &str) -> Option<&Bytes> {
        self.server_params.get(name)
    }

    pub fn suggested_pool_size(&self) -> Option<usize> {
        self.suggested_pool_size
    }

    pub fn command_lock(&self) -> CommandLock {
        self.lock.clone()
    }

    /// Graceful goodbye; consumes the connection.
    pub async fn terminate(mut self) {
        if self.phase == ConnectionPhase::Ready {
            let _ = tokio::time::timeout(
                TERMINATE_GRACE,
                self.framed.send(ClientMessage::Terminate),
            )
            .await;
        }
        let _ = self.framed.close().await;
        self.phase = ConnectionPhase::Disconnected;
    }
}

impl std::fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawConnection")
            .field("phase", &self.phase)
            .field("protocol", &self.protocol)
            .field("transaction_status", &self.transaction_status)
            .finish()
    }
}

/// Maps server log severities onto the driver's logger.
fn route_log_message(severity: MessageSeverity, code: u32, text: &str) {
    match severity {
        MessageSeverity::Debug => debug!(code, "server: {text}"),
        MessageSeverity::Info | MessageSeverity::Notice => info!(code, "server: {text}"),
        MessageSeverity::Warning => warn!(code, "server: {text}"),
    }
}
