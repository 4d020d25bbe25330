// tests/integration/transaction_test.rs

//! Transaction orchestration: commit, retry on conflicts, rollback on
//! failure, and facade lifetime rules.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use peridot::errors::{codes, PeridotError, ServerError};
use peridot::protocol::Cardinality;
use peridot::Transaction;

use super::test_helpers::*;

fn conflict_error() -> PeridotError {
    PeridotError::Server(ServerError {
        severity: 120,
        code: codes::TRANSACTION_SERIALIZATION,
        message: "could not serialize access".to_string(),
        attributes: Default::default(),
    })
}

#[tokio::test]
async fn transaction_commits_and_returns_value() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select 123",
        canned_int64(Cardinality::AtMostOne, &[123]),
    )]))
    .await;
    let client = test_client(&server);

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let value = client
        .transaction(&token(), move |tx| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tx.query_required_single::<i64>("select 123", ()).await
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 123);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transaction_retries_failed_commits_until_success() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select 123",
        canned_int64(Cardinality::AtMostOne, &[123]),
    )]))
    .await;
    // Default retry budget is 3 attempts; two commit conflicts fit in it.
    server.behavior.fail_commits.store(2, Ordering::SeqCst);
    let client = test_client(&server);

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let value = client
        .transaction(&token(), move |tx| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tx.query_required_single::<i64>("select 123", ()).await
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 123);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retryable_body_error_exhausts_budget_and_surfaces() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = test_client(&server);

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let err = client
        .transaction::<i64, _, _>(&token(), move |_tx| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(conflict_error())
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PeridotError::Server(ref e) if codes::is_retryable(e.code)));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retryable_body_error_below_budget_recovers() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select 123",
        canned_int64(Cardinality::AtMostOne, &[123]),
    )]))
    .await;
    let client = test_client(&server);

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let value = client
        .transaction(&token(), move |tx| {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(conflict_error());
                }
                tx.query_required_single::<i64>("select 123", ()).await
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 123);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_retryable_body_error_runs_once() {
    let server = MockServer::spawn(Behavior::default()).await;
    let client = test_client(&server);

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let err = client
        .transaction::<i64, _, _>(&token(), move |_tx| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(PeridotError::ArgumentMismatch("bad input".to_string()))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transaction_facade_is_inert_after_callback() {
    let server = MockServer::spawn(Behavior::with_queries([(
        "select 123",
        canned_int64(Cardinality::AtMostOne, &[123]),
    )]))
    .await;
    let client = test_client(&server);

    let leaked: Arc<Mutex<Option<Transaction>>> = Arc::new(Mutex::new(None));
    let stash = leaked.clone();
    client
        .transaction(&token(), move |tx| {
            let stash = stash.clone();
            async move {
                *stash.lock().unwrap() = Some(tx.clone());
                tx.query_required_single::<i64>("select 123", ()).await
            }
        })
        .await
        .unwrap();

    let tx = leaked.lock().unwrap().take().unwrap();
    let err = tx.query::<i64>("select 123", ()).await.unwrap_err();
    assert!(matches!(err, PeridotError::TransactionClosed));
}
