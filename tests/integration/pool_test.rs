// tests/integration/pool_test.rs

//! Pool borrow/return semantics: healthy connections rejoin the idle set,
//! poisoned ones are destroyed, waiters respect timeouts and cancellation.

use std::time::Duration;

use peridot::client::SessionState;
use peridot::codec::{Arguments, QueryCache};
use peridot::config::{ClientConfig, ConnectionConfig, TlsSecurity};
use peridot::connection::QueryRequest;
use peridot::errors::PeridotError;
use peridot::protocol::{Cardinality, OutputFormat};
use peridot::Client;

use super::test_helpers::*;

fn small_pool_client(server: &MockServer, max: usize, timeout: Duration) -> Client {
    let connect = ConnectionConfig::new("127.0.0.1", server.addr.port())
        .user("edgedb")
        .database("testdb")
        .tls_security(TlsSecurity::Disabled)
        .wait_until_available(Duration::from_millis(200));
    let config = ClientConfig::default()
        .max_connections(max)
        .connection_timeout(timeout);
    Client::new(connect, config).unwrap()
}

#[tokio::test]
async fn clean_release_returns_connection_to_idle_set() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = test_client(&server);

    let handle = client.pool().acquire(&token()).await.unwrap();
    assert_eq!(client.pool().size(), 1);
    assert_eq!(client.pool().idle_count(), 0);

    drop(handle);
    tokio::task::yield_now().await;

    assert_eq!(client.pool().size(), 1);
    assert_eq!(client.pool().idle_count(), 1);
}

#[tokio::test]
async fn connection_error_destroys_instead_of_returning() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = test_client(&server);

    let mut handle = client.pool().acquire(&token()).await.unwrap();
    server.kill_connections();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let request = QueryRequest::new("select 1", Cardinality::AtMostOne, OutputFormat::Binary);
    let cache = QueryCache::new();
    let err = handle
        .connection()
        .execute_request(
            &request,
            &Arguments::None,
            &SessionState::new(),
            &cache,
            &token(),
        )
        .await
        .unwrap_err();
    assert!(err.poisons_connection());

    drop(handle);
    tokio::task::yield_now().await;

    assert_eq!(client.pool().idle_count(), 0);
    assert_eq!(client.pool().size(), 0);
}

#[tokio::test]
async fn acquire_times_out_under_contention() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = small_pool_client(&server, 1, Duration::from_millis(150));

    let _held = client.pool().acquire(&token()).await.unwrap();
    let err = client.pool().acquire(&token()).await.unwrap_err();
    assert!(matches!(err, PeridotError::AcquireTimeout));
}

#[tokio::test]
async fn acquire_respects_cancellation_token() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = small_pool_client(&server, 1, Duration::from_secs(30));

    let _held = client.pool().acquire(&token()).await.unwrap();

    let cancel = token();
    let waiter_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waiter_cancel.cancel();
    });
    let err = client.pool().acquire(&cancel).await.unwrap_err();
    assert!(matches!(err, PeridotError::Cancelled));
}

#[tokio::test]
async fn waiter_gets_connection_released_by_holder() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = small_pool_client(&server, 1, Duration::from_secs(5));

    let held = client.pool().acquire(&token()).await.unwrap();
    let pool = client.pool().clone();
    let waiter = tokio::spawn(async move { pool.acquire(&token()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(held);

    let handle = waiter.await.unwrap().unwrap();
    drop(handle);
}

#[tokio::test]
async fn closed_pool_refuses_new_borrows() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = test_client(&server);

    client.ensure_connected(&token()).await.unwrap();
    client.close().await;

    let err = client.pool().acquire(&token()).await.unwrap_err();
    assert!(matches!(err, PeridotError::PoolClosed));
    assert_eq!(client.pool().idle_count(), 0);
}
