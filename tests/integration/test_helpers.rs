// tests/integration/test_helpers.rs

//! Test helpers: an in-process mock server speaking the wire protocol,
//! canned query definitions, and descriptor/data builders.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use uuid::Uuid;

use peridot::codec::ids;
use peridot::config::{ClientConfig, ConnectionConfig, TlsSecurity};
use peridot::errors::{codes, ServerError};
use peridot::protocol::client::ClientMessage;
use peridot::protocol::frame::frame_bytes;
use peridot::protocol::server::{Authentication, ServerMessage};
use peridot::protocol::{
    Capabilities, Cardinality, PacketReader, PacketWriter, TransactionStatus,
};
use peridot::{CancellationToken, Client};

// Fixed descriptor ids for the shapes the mock serves. Shapes and ids are
// stable across tests because the codec registry is process-wide.
pub const TUPLE_II_ID: Uuid = Uuid::from_u128(0xA001);
pub const NAMED_TUPLE_II_ID: Uuid = Uuid::from_u128(0xA002);
pub const ARG_SHAPE_STR_ID: Uuid = Uuid::from_u128(0xA003);
const STATE_PAIR_ID: Uuid = Uuid::from_u128(0xB001);
const STATE_ALIASES_ID: Uuid = Uuid::from_u128(0xB002);
const STATE_CONFIG_ID: Uuid = Uuid::from_u128(0xB003);
const STATE_GLOBALS_ID: Uuid = Uuid::from_u128(0xB004);
const STATE_ROOT_ID: Uuid = Uuid::from_u128(0xB005);

/// One query the mock knows how to parse and execute.
#[derive(Clone)]
pub struct CannedQuery {
    pub cardinality: Cardinality,
    pub input_id: Uuid,
    pub input_desc: Bytes,
    pub output_id: Uuid,
    pub output_desc: Bytes,
    pub rows: Vec<Bytes>,
}

/// Scripted behavior shared by every connection of one mock server.
#[derive(Default)]
pub struct Behavior {
    pub queries: Mutex<HashMap<String, CannedQuery>>,
    /// How many `commit` statements fail with a transaction conflict
    /// before commits start succeeding.
    pub fail_commits: AtomicU32,
}

impl Behavior {
    pub fn with_queries<I>(queries: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, CannedQuery)>,
    {
        Behavior {
            queries: Mutex::new(
                queries
                    .into_iter()
                    .map(|(text, canned)| (text.to_string(), canned))
                    .collect(),
            ),
            fail_commits: AtomicU32::new(0),
        }
    }
}

/// An in-process server accepting real TCP connections.
pub struct MockServer {
    pub addr: SocketAddr,
    kill: broadcast::Sender<()>,
    pub behavior: Arc<Behavior>,
}

impl MockServer {
    pub async fn spawn(behavior: Behavior) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let behavior = Arc::new(behavior);
        let (kill, _) = broadcast::channel(1);

        let accept_behavior = behavior.clone();
        let accept_kill = kill.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let behavior = accept_behavior.clone();
                let kill_rx = accept_kill.subscribe();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, behavior, kill_rx).await;
                });
            }
        });

        MockServer {
            addr,
            kill,
            behavior,
        }
    }

    /// Abruptly drops every open connection, simulating a server crash.
    pub fn kill_connections(&self) {
        let _ = self.kill.send(());
    }
}

/// A client wired to the given mock server over plaintext TCP.
pub fn test_client(server: &MockServer) -> Client {
    let connect = ConnectionConfig::new("127.0.0.1", server.addr.port())
        .user("edgedb")
        .database("testdb")
        .tls_security(TlsSecurity::Disabled)
        .wait_until_available(std::time::Duration::from_secs(2));
    let config = ClientConfig::default()
        .max_connections(2)
        .connection_timeout(std::time::Duration::from_secs(5));
    Client::new(connect, config).unwrap()
}

pub fn token() -> CancellationToken {
    CancellationToken::new()
}

// --- Mock connection loop -------------------------------------------------

async fn serve_connection(
    mut stream: TcpStream,
    behavior: Arc<Behavior>,
    mut kill: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    // Handshake: the first message must be a ClientHandshake.
    match read_client_message(&mut stream).await? {
        Some(ClientMessage::ClientHandshake { .. }) => {}
        _ => return Ok(()),
    }
    send(&mut stream, &ServerMessage::ServerHandshake {
        major: 2,
        minor: 0,
        extensions: Vec::new(),
    })
    .await?;
    send(&mut stream, &ServerMessage::Authentication(Authentication::Ok)).await?;
    send(&mut stream, &ServerMessage::ServerKeyData { data: [7u8; 32] }).await?;
    send(&mut stream, &ServerMessage::ParameterStatus {
        name: "suggested_pool_concurrency".to_string(),
        value: Bytes::from_static(b"10"),
    })
    .await?;
    let (state_id, state_desc) = state_descriptor();
    send(&mut stream, &ServerMessage::StateDataDescription {
        typedesc_id: state_id,
        typedesc: state_desc,
    })
    .await?;
    let mut tx_status = TransactionStatus::NotInTransaction;
    send_ready(&mut stream, tx_status).await?;

    loop {
        let message = tokio::select! {
            _ = kill.recv() => return Ok(()),
            message = read_client_message(&mut stream) => message?,
        };
        let Some(message) = message else {
            return Ok(());
        };
        match message {
            ClientMessage::Parse(parse) => {
                let canned = lookup(&behavior, &parse.command_text);
                match canned {
                    Some(canned) => {
                        send(&mut stream, &ServerMessage::CommandDataDescription {
                            annotations: Vec::new(),
                            capabilities: Capabilities::ALL,
                            result_cardinality: canned.cardinality,
                            input_typedesc_id: canned.input_id,
                            input_typedesc: canned.input_desc.clone(),
                            output_typedesc_id: canned.output_id,
                            output_typedesc: canned.output_desc.clone(),
                        })
                        .await?;
                    }
                    None if is_script(&parse.command_text) => {
                        send(&mut stream, &ServerMessage::CommandDataDescription {
                            annotations: Vec::new(),
                            capabilities: Capabilities::ALL,
                            result_cardinality: Cardinality::NoResult,
                            input_typedesc_id: ids::EMPTY_TUPLE,
                            input_typedesc: Bytes::new(),
                            output_typedesc_id: ids::NULL,
                            output_typedesc: Bytes::new(),
                        })
                        .await?;
                    }
                    None => {
                        send_error(&mut stream, codes::QUERY_ERROR, "unknown query").await?;
                    }
                }
                send_ready(&mut stream, tx_status).await?;
            }
            ClientMessage::Execute(execute) => {
                let text = execute.command_text.as_str();
                if text.starts_with("start transaction") {
                    tx_status = TransactionStatus::InTransaction;
                    send_complete(&mut stream, "START TRANSACTION").await?;
                    send_ready(&mut stream, tx_status).await?;
                } else if text == "commit" {
                    let failed = behavior
                        .fail_commits
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            (n > 0).then(|| n - 1)
                        })
                        .is_ok();
                    tx_status = TransactionStatus::NotInTransaction;
                    if failed {
                        send_error(
                            &mut stream,
                            codes::TRANSACTION_SERIALIZATION,
                            "could not serialize access",
                        )
                        .await?;
                    } else {
                        send_complete(&mut stream, "COMMIT").await?;
                    }
                    send_ready(&mut stream, tx_status).await?;
                } else if text == "rollback" {
                    tx_status = TransactionStatus::NotInTransaction;
                    send_complete(&mut stream, "ROLLBACK").await?;
                    send_ready(&mut stream, tx_status).await?;
                } else {
                    match lookup(&behavior, text) {
                        Some(canned) => {
                            if !canned.rows.is_empty() {
                                send(&mut stream, &ServerMessage::Data {
                                    chunks: canned.rows.clone(),
                                })
                                .await?;
                            }
                            send_complete(&mut stream, "SELECT").await?;
                        }
                        None if is_script(text) => {
                            send_complete(&mut stream, "OK").await?;
                        }
                        None => {
                            send_error(&mut stream, codes::QUERY_ERROR, "unknown query")
                                .await?;
                        }
                    }
                    send_ready(&mut stream, tx_status).await?;
                }
            }
            ClientMessage::Sync | ClientMessage::Flush => {
                send_ready(&mut stream, tx_status).await?;
            }
            ClientMessage::Terminate => return Ok(()),
            _ => {}
        }
    }
}

fn lookup(behavior: &Behavior, text: &str) -> Option<CannedQuery> {
    behavior.queries.lock().unwrap().get(text).cloned()
}

fn is_script(text: &str) -> bool {
    text.starts_with("start transaction")
        || text == "commit"
        || text == "rollback"
        || text.starts_with("create ")
        || text.starts_with("insert ")
        || text.starts_with("set ")
}

async fn send(stream: &mut TcpStream, message: &ServerMessage) -> std::io::Result<()> {
    let mut payload = PacketWriter::new();
    message.encode_payload(&mut payload);
    let frame = frame_bytes(message.tag(), &payload.into_bytes());
    stream.write_all(&frame).await?;
    stream.flush().await
}

async fn send_ready(stream: &mut TcpStream, status: TransactionStatus) -> std::io::Result<()> {
    send(stream, &ServerMessage::ReadyForCommand {
        annotations: Vec::new(),
        transaction_status: status,
    })
    .await
}

async fn send_complete(stream: &mut TcpStream, status: &str) -> std::io::Result<()> {
    send(stream, &ServerMessage::CommandComplete {
        annotations: Vec::new(),
        capabilities: Capabilities::ALL,
        status: status.to_string(),
        state_typedesc_id: ids::NULL,
        state_data: Bytes::new(),
    })
    .await
}

async fn send_error(stream: &mut TcpStream, code: u32, message: &str) -> std::io::Result<()> {
    send(stream, &ServerMessage::ErrorResponse(ServerError {
        severity: 120,
        code,
        message: message.to_string(),
        attributes: Default::default(),
    }))
    .await
}

async fn read_client_message(
    stream: &mut TcpStream,
) -> std::io::Result<Option<ClientMessage>> {
    let mut header = [0u8; 5];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let tag = header[0];
    let len = u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; len - 4];
    stream.read_exact(&mut payload).await?;
    let mut reader = PacketReader::new(&payload);
    ClientMessage::decode_payload(tag, &mut reader)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

// --- Descriptor builders --------------------------------------------------

/// A blob containing a single well-known base scalar node.
pub fn scalar_descriptor(id: Uuid) -> Bytes {
    let mut w = PacketWriter::new();
    w.write_u8(0x02);
    w.write_uuid(&id);
    w.into_bytes()
}

/// `tuple<int64, int64>`.
pub fn tuple2_int_descriptor() -> Bytes {
    let mut w = PacketWriter::new();
    w.write_u8(0x02);
    w.write_uuid(&ids::INT64);
    w.write_u8(0x04);
    w.write_uuid(&TUPLE_II_ID);
    w.write_u16(2);
    w.write_u16(0);
    w.write_u16(0);
    w.into_bytes()
}

/// `tuple<one: int64, two: int64>`.
pub fn named_tuple2_int_descriptor() -> Bytes {
    let mut w = PacketWriter::new();
    w.write_u8(0x02);
    w.write_uuid(&ids::INT64);
    w.write_u8(0x05);
    w.write_uuid(&NAMED_TUPLE_II_ID);
    w.write_u16(2);
    w.write_string("one");
    w.write_u16(0);
    w.write_string("two");
    w.write_u16(0);
    w.into_bytes()
}

/// An argument shape with one required `str` parameter named "0".
pub fn str_arg_shape_descriptor() -> Bytes {
    let mut w = PacketWriter::new();
    w.write_u8(0x02);
    w.write_uuid(&ids::STR);
    w.write_u8(0x01);
    w.write_uuid(&ARG_SHAPE_STR_ID);
    w.write_u16(1);
    w.write_u32(0);
    w.write_u8(Cardinality::One as u8);
    w.write_string("0");
    w.write_u16(0);
    w.into_bytes()
}

/// The session-state shape: module, aliases, config, globals.
fn state_descriptor() -> (Uuid, Bytes) {
    let mut w = PacketWriter::new();
    // 0: str
    w.write_u8(0x02);
    w.write_uuid(&ids::STR);
    // 1: tuple<str, str>
    w.write_u8(0x04);
    w.write_uuid(&STATE_PAIR_ID);
    w.write_u16(2);
    w.write_u16(0);
    w.write_u16(0);
    // 2: array<tuple<str, str>>
    w.write_u8(0x06);
    w.write_uuid(&STATE_ALIASES_ID);
    w.write_u16(1);
    w.write_u16(1);
    w.write_i32(-1);
    // 3: input shape (config), empty
    w.write_u8(0x08);
    w.write_uuid(&STATE_CONFIG_ID);
    w.write_u16(0);
    // 4: input shape (globals), empty
    w.write_u8(0x08);
    w.write_uuid(&STATE_GLOBALS_ID);
    w.write_u16(0);
    // 5: the root sparse state shape
    w.write_u8(0x08);
    w.write_uuid(&STATE_ROOT_ID);
    w.write_u16(4);
    for (name, pos) in [("module", 0u16), ("aliases", 2), ("config", 3), ("globals", 4)] {
        w.write_u32(0);
        w.write_u8(Cardinality::AtMostOne as u8);
        w.write_string(name);
        w.write_u16(pos);
    }
    (STATE_ROOT_ID, w.into_bytes())
}

// --- Data builders --------------------------------------------------------

pub fn int64_row(value: i64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

pub fn str_row(value: &str) -> Bytes {
    Bytes::copy_from_slice(value.as_bytes())
}

pub fn json_row(value: &str) -> Bytes {
    let mut w = PacketWriter::new();
    w.write_u8(1);
    w.write_raw(value.as_bytes());
    w.into_bytes()
}

pub fn tuple2_int_row(a: i64, b: i64) -> Bytes {
    let mut w = PacketWriter::new();
    w.write_i32(2);
    for value in [a, b] {
        w.write_i32(0);
        w.write_i32(8);
        w.write_i64(value);
    }
    w.into_bytes()
}

// --- Canned query builders ------------------------------------------------

pub fn canned_int64(cardinality: Cardinality, values: &[i64]) -> CannedQuery {
    CannedQuery {
        cardinality,
        input_id: ids::EMPTY_TUPLE,
        input_desc: Bytes::new(),
        output_id: ids::INT64,
        output_desc: scalar_descriptor(ids::INT64),
        rows: values.iter().copied().map(int64_row).collect(),
    }
}

pub fn canned_str(cardinality: Cardinality, value: &str) -> CannedQuery {
    CannedQuery {
        cardinality,
        input_id: ids::EMPTY_TUPLE,
        input_desc: Bytes::new(),
        output_id: ids::STR,
        output_desc: scalar_descriptor(ids::STR),
        rows: vec![str_row(value)],
    }
}

pub fn canned_json(value: &str) -> CannedQuery {
    CannedQuery {
        cardinality: Cardinality::Many,
        input_id: ids::EMPTY_TUPLE,
        input_desc: Bytes::new(),
        output_id: ids::JSON,
        output_desc: scalar_descriptor(ids::JSON),
        rows: vec![json_row(value)],
    }
}

pub fn canned_tuple2(a: i64, b: i64) -> CannedQuery {
    CannedQuery {
        cardinality: Cardinality::AtMostOne,
        input_id: ids::EMPTY_TUPLE,
        input_desc: Bytes::new(),
        output_id: TUPLE_II_ID,
        output_desc: tuple2_int_descriptor(),
        rows: vec![tuple2_int_row(a, b)],
    }
}

pub fn canned_named_tuple2(a: i64, b: i64) -> CannedQuery {
    CannedQuery {
        cardinality: Cardinality::AtMostOne,
        input_id: ids::EMPTY_TUPLE,
        input_desc: Bytes::new(),
        output_id: NAMED_TUPLE_II_ID,
        output_desc: named_tuple2_int_descriptor(),
        rows: vec![tuple2_int_row(a, b)],
    }
}

pub fn canned_str_with_arg(value: &str) -> CannedQuery {
    CannedQuery {
        cardinality: Cardinality::One,
        input_id: ARG_SHAPE_STR_ID,
        input_desc: str_arg_shape_descriptor(),
        output_id: ids::STR,
        output_desc: scalar_descriptor(ids::STR),
        rows: vec![str_row(value)],
    }
}
