// src/connection/command.rs

//! The command execution cycle: `Parse`/`Execute` round trips, codec
//! resolution through the query cache, session-state piggybacking, and the
//! dump/restore plumbing.
//!
//! The protocol is half-duplex per command: after sending a request the
//! engine reads until a terminal frame (`ReadyForCommand`, or a fatal
//! transport error). `LogMessage` frames may interleave anywhere and are
//! absorbed by the receive path.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use super::raw::{ConnectionPhase, RawConnection};
use crate::client::state::{state_hash, SessionState};
use crate::codec::{
    self, arguments, Arguments, CachedQuery, Codec, DescriptorReader, QueryCache, QueryCacheKey,
    Value,
};
use crate::errors::{PeridotError, Result};
use crate::protocol::client::{Execute, Parse};
use crate::protocol::{
    Capabilities, Cardinality, ClientMessage, OutputFormat, ServerMessage, TransactionStatus,
};

/// One query to run, with its execution policy.
#[derive(Debug, Clone)]
pub struct QueryRequest<'q> {
    pub text: &'q str,
    pub cardinality: Cardinality,
    pub format: OutputFormat,
    pub capabilities: Capabilities,
    pub implicit_limit: u64,
}

impl<'q> QueryRequest<'q> {
    pub fn new(text: &'q str, cardinality: Cardinality, format: OutputFormat) -> Self {
        QueryRequest {
            text,
            cardinality,
            format,
            capabilities: Capabilities::ALL,
            implicit_limit: 0,
        }
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// The decoded result of one executed command.
#[derive(Debug)]
pub struct QueryOutcome {
    pub values: Vec<Value>,
    pub result_cardinality: Cardinality,
    pub status: String,
}

impl RawConnection {
    /// Runs one command: resolves codecs (parsing if the cache is cold),
    /// encodes arguments and session state, executes, and decodes every
    /// returned element.
    ///
    /// On a server-signalled descriptor or state mismatch the cache entry
    /// is invalidated and the cycle re-parses exactly once.
    pub async fn execute_request(
        &mut self,
        request: &QueryRequest<'_>,
        args: &Arguments,
        state: &SessionState,
        cache: &QueryCache,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome> {
        let _guard = self.lock.acquire(cancel).await?;

        let key = QueryCacheKey::new(
            request.text,
            request.cardinality,
            request.format,
            request.capabilities,
        );
        let registry = codec::registry::global();
        let mut reparsed = false;

        loop {
            let cached = match cache.get(&key) {
                Some(cached) => cached,
                None => {
                    let cached = self.parse_request(request, state, cancel).await?;
                    cache.insert(key.clone(), cached);
                    cached
                }
            };

            // Codecs were materialized when the descriptors were read; a
            // miss here means the entry predates this process's registry.
            let missing_output = cached.output_id != codec::ids::NULL
                && !registry.contains(&cached.output_id);
            let Some(input_codec) = registry.get(&cached.input_id).filter(|_| !missing_output)
            else {
                if reparsed {
                    return Err(PeridotError::ProtocolViolation(format!(
                        "no codec registered for cached query type {}",
                        cached.input_id
                    )));
                }
                cache.invalidate(&key);
                reparsed = true;
                continue;
            };
            let output_codec = registry.get(&cached.output_id);

            match self
                .execute_cached(
                    request,
                    &cached,
                    &input_codec,
                    output_codec,
                    args,
                    state,
                    cancel,
                )
                .await
            {
                Err(e) if e.needs_reparse() && !reparsed => {
                    debug!(error = %e, "stale codecs or state, re-preparing once");
                    reparsed = true;
                    cache.invalidate(&key);
                    self.last_state_hash = None;
                    continue;
                }
                outcome => return outcome,
            }
        }
    }

    /// `Parse` round trip: returns the codec pair the server assigned and
    /// materializes both codec trees into the global registry.
    async fn parse_request(
        &mut self,
        request: &QueryRequest<'_>,
        state: &SessionState,
        cancel: &CancellationToken,
    ) -> Result<CachedQuery> {
        let (state_id, state_data) = self.encode_state(state)?;
        self.send(ClientMessage::Parse(Parse {
            annotations: Vec::new(),
            allowed_capabilities: request.capabilities,
            compilation_flags: 0,
            implicit_limit: request.implicit_limit,
            output_format: request.format,
            expected_cardinality: request.cardinality,
            command_text: request.text.to_string(),
            state_typedesc_id: state_id,
            state_data,
        }))
        .await?;
        self.phase = ConnectionPhase::ExecutingCommand;

        let registry = codec::registry::global();
        let mut prepared: Option<CachedQuery> = None;
        let mut failure: Option<PeridotError> = None;

        loop {
            match self.recv(cancel).await? {
                ServerMessage::CommandDataDescription {
                    result_cardinality,
                    capabilities,
                    input_typedesc_id,
                    input_typedesc,
                    output_typedesc_id,
                    output_typedesc,
                    ..
                } => {
                    let reader = DescriptorReader::new(registry);
                    reader.build(input_typedesc_id, &input_typedesc)?;
                    if output_typedesc_id != codec::ids::NULL {
                        reader.build(output_typedesc_id, &output_typedesc)?;
                    }
                    prepared = Some(CachedQuery {
                        input_id: input_typedesc_id,
                        output_id: output_typedesc_id,
                        capabilities,
                        result_cardinality,
                    });
                }
                ServerMessage::StateDataDescription {
                    typedesc_id,
                    typedesc,
                } => {
                    self.install_state_descriptor(typedesc_id, &typedesc)?;
                }
                ServerMessage::ErrorResponse(e) => {
                    failure = Some(PeridotError::Server(e));
                }
                ServerMessage::ReadyForCommand {
                    transaction_status, ..
                } => {
                    self.transaction_status = transaction_status;
                    self.phase = ConnectionPhase::Ready;
                    return match failure {
                        Some(e) => Err(e),
                        None => prepared.ok_or_else(|| PeridotError::UnexpectedMessage {
                            expected: "CommandDataDescription",
                            got: "ReadyForCommand".to_string(),
                        }),
                    };
                }
                other => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "CommandDataDescription",
                        got: other.name().to_string(),
                    });
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_cached(
        &mut self,
        request: &QueryRequest<'_>,
        cached: &CachedQuery,
        input_codec: &Arc<dyn Codec>,
        output_codec: Option<Arc<dyn Codec>>,
        args: &Arguments,
        state: &SessionState,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome> {
        let arguments = arguments::encode(input_codec, &cached.input_id, args)?;
        let (state_id, state_data) = self.encode_state(state)?;
        let shipped_state = (state_id != codec::ids::NULL).then(|| state_hash(&state_data));

        self.send(ClientMessage::Execute(Execute {
            annotations: Vec::new(),
            allowed_capabilities: request.capabilities,
            compilation_flags: 0,
            implicit_limit: request.implicit_limit,
            output_format: request.format,
            expected_cardinality: request.cardinality,
            command_text: request.text.to_string(),
            state_typedesc_id: state_id,
            state_data,
            input_typedesc_id: cached.input_id,
            output_typedesc_id: cached.output_id,
            arguments,
        }))
        .await?;
        self.phase = ConnectionPhase::ExecutingCommand;

        let registry = codec::registry::global();
        let mut output_codec = output_codec;
        let mut values = Vec::new();
        let mut result_cardinality = cached.result_cardinality;
        let mut status = String::new();
        let mut failure: Option<PeridotError> = None;

        loop {
            match self.recv(cancel).await? {
                ServerMessage::Data { chunks } => {
                    if failure.is_some() {
                        continue;
                    }
                    let codec = output_codec.as_ref().ok_or_else(|| {
                        PeridotError::ProtocolViolation(
                            "server sent data for a statement with no output".to_string(),
                        )
                    })?;
                    for chunk in &chunks {
                        trace!(len = chunk.len(), "decoding result element");
                        values.push(codec.decode(chunk)?);
                    }
                }
                // The schema changed between parse and execute; the server
                // re-describes and proceeds with the new codecs.
                ServerMessage::CommandDataDescription {
                    result_cardinality: new_cardinality,
                    output_typedesc_id,
                    output_typedesc,
                    ..
                } => {
                    let reader = DescriptorReader::new(registry);
                    output_codec = (output_typedesc_id != codec::ids::NULL)
                        .then(|| reader.build(output_typedesc_id, &output_typedesc))
                        .transpose()?;
                    result_cardinality = new_cardinality;
                }
                ServerMessage::StateDataDescription {
                    typedesc_id,
                    typedesc,
                } => {
                    self.install_state_descriptor(typedesc_id, &typedesc)?;
                }
                ServerMessage::CommandComplete {
                    status: complete_status,
                    ..
                } => {
                    status = complete_status;
                }
                ServerMessage::ErrorResponse(e) => {
                    failure = Some(PeridotError::Server(e));
                }
                ServerMessage::ReadyForCommand {
                    transaction_status, ..
                } => {
                    self.transaction_status = transaction_status;
                    self.phase = ConnectionPhase::Ready;
                    return match failure {
                        Some(e) => Err(e),
                        None => {
                            if let Some(hash) = shipped_state {
                                self.last_state_hash = Some(hash);
                            }
                            Ok(QueryOutcome {
                                values,
                                result_cardinality,
                                status,
                            })
                        }
                    };
                }
                other => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "Data or CommandComplete",
                        got: other.name().to_string(),
                    });
                }
            }
        }
    }

    /// Encodes the session state for transmission. Returns the null id
    /// (meaning "unchanged / default") when the state matches what this
    /// connection last shipped, so identical state never travels twice.
    fn encode_state(&mut self, state: &SessionState) -> Result<(Uuid, Bytes)> {
        if state.is_default() && self.last_state_hash.is_none() {
            return Ok((codec::ids::NULL, Bytes::new()));
        }
        let codec = match &self.state_codec {
            Some(codec) => codec,
            None if state.is_default() => return Ok((codec::ids::NULL, Bytes::new())),
            None => {
                return Err(PeridotError::ProtocolViolation(
                    "session state was set, but the server never described a state shape"
                        .to_string(),
                ));
            }
        };
        let mut w = crate::protocol::PacketWriter::new();
        codec.encode(&mut w, &Value::SparseObject(state.to_sparse()))?;
        let encoded = w.into_bytes();
        if self.last_state_hash == Some(state_hash(&encoded)) {
            // Unchanged since the last command on this connection.
            return Ok((codec::ids::NULL, Bytes::new()));
        }
        Ok((self.state_typedesc_id, encoded))
    }

    /// `Sync` round trip: a no-op command cycle that re-synchronizes the
    /// stream and refreshes the transaction status. Doubles as a liveness
    /// probe.
    pub async fn sync(&mut self, cancel: &CancellationToken) -> Result<TransactionStatus> {
        let _guard = self.lock.acquire(cancel).await?;
        self.send(ClientMessage::Sync).await?;
        self.phase = ConnectionPhase::ExecutingCommand;
        loop {
            match self.recv(cancel).await? {
                ServerMessage::ReadyForCommand {
                    transaction_status, ..
                } => {
                    self.transaction_status = transaction_status;
                    self.phase = ConnectionPhase::Ready;
                    return Ok(transaction_status);
                }
                ServerMessage::ErrorResponse(e) => {
                    return Err(self
                        .drain_after_error(PeridotError::Server(e), cancel)
                        .await);
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

    /// Streams a database dump. Header attributes are returned; every data
    /// block is handed to `on_block` in arrival order.
    pub async fn dump(
        &mut self,
        cancel: &CancellationToken,
        mut on_block: impl FnMut(Bytes) -> Result<()>,
    ) -> Result<Vec<(String, Bytes)>> {
        let _guard = self.lock.acquire(cancel).await?;
        self.send(ClientMessage::Dump {
            annotations: Vec::new(),
        })
        .await?;
        self.phase = ConnectionPhase::ExecutingCommand;

        let mut header = None;
        let mut failure: Option<PeridotError> = None;
        loop {
            match self.recv(cancel).await? {
                ServerMessage::DumpHeader { attributes, .. } => {
                    header = Some(attributes);
                }
                ServerMessage::DumpBlock { data } => {
                    if failure.is_none() {
                        on_block(data)?;
                    }
                }
                ServerMessage::CommandComplete { .. } => {}
                ServerMessage::ErrorResponse(e) => {
                    failure = Some(PeridotError::Server(e));
                }
                ServerMessage::ReadyForCommand {
                    transaction_status, ..
                } => {
                    self.transaction_status = transaction_status;
                    self.phase = ConnectionPhase::Ready;
                    return match failure {
                        Some(e) => Err(e),
                        None => header.ok_or(PeridotError::UnexpectedMessage {
                            expected: "DumpHeader",
                            got: "ReadyForCommand".to_string(),
                        }),
                    };
                }
                other => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "DumpHeader or DumpBlock",
                        got: other.name().to_string(),
                    });
                }
            }
        }
    }

    /// Restores a dump taken with [`RawConnection::dump`]. The server must
    /// acknowledge the header with `RestoreReady` before any block is sent.
    pub async fn restore(
        &mut self,
        cancel: &CancellationToken,
        header: Bytes,
        blocks: impl IntoIterator<Item = Bytes>,
    ) -> Result<String> {
        let _guard = self.lock.acquire(cancel).await?;
        self.send(ClientMessage::Restore {
            jobs: 1,
            header_data: header,
        })
        .await?;
        self.phase = ConnectionPhase::ExecutingCommand;

        loop {
            match self.recv(cancel).await? {
                ServerMessage::RestoreReady { .. } => break,
                ServerMessage::ErrorResponse(e) => {
                    return Err(self
                        .drain_after_error(PeridotError::Server(e), cancel)
                        .await);
                }
                other => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "RestoreReady",
                        got: other.name().to_string(),
                    });
                }
            }
        }

        for block in blocks {
            self.send(ClientMessage::RestoreBlock { data: block }).await?;
        }
        self.send(ClientMessage::RestoreEof).await?;

        let mut status = String::new();
        let mut failure: Option<PeridotError> = None;
        loop {
            match self.recv(cancel).await? {
                ServerMessage::CommandComplete {
                    status: complete_status,
                    ..
                } => status = complete_status,
                ServerMessage::ErrorResponse(e) => {
                    failure = Some(PeridotError::Server(e));
                }
                ServerMessage::ReadyForCommand {
                    transaction_status, ..
                } => {
                    self.transaction_status = transaction_status;
                    self.phase = ConnectionPhase::Ready;
                    return match failure {
                        Some(e) => Err(e),
                        None => Ok(status),
                    };
                }
                other => {
                    self.phase = ConnectionPhase::Errored;
                    return Err(PeridotError::UnexpectedMessage {
                        expected: "CommandComplete",
                        got: other.name().to_string(),
                    });
                }
            }
        }
    }

    /// Reads to the terminal frame after a server error, then yields the
    /// error back for propagation. Transport failures while draining take
    /// precedence since they poison the connection.
    async fn drain_after_error(
        &mut self,
        error: PeridotError,
        cancel: &CancellationToken,
    ) -> PeridotError {
        loop {
            match self.recv(cancel).await {
                Ok(ServerMessage::ReadyForCommand {
                    transaction_status, ..
                }) => {
                    self.transaction_status = transaction_status;
                    self.phase = ConnectionPhase::Ready;
                    return error;
                }
                Ok(_) => continue,
                Err(transport) => return transport,
            }
        }
    }
}
