// src/client/transaction.rs

//! Transaction orchestration: a callback receives a transactional facade
//! pinned to one connection; commit/rollback and the retry loop live here.
//!
//! The facade deliberately has no `transaction` method (nested
//! transactions are refused by construction) and goes inert once the
//! callback returns.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pool::{Pool, PoolHandle};
use super::state::SessionState;
use crate::codec::{Arguments, Queryable};
use crate::config::{RetryCondition, RetryOptions, TransactionOptions};
use crate::connection::{QueryOutcome, QueryRequest};
use crate::errors::{ErrorKind, PeridotError, Result};
use crate::model::Json;
use crate::protocol::{Capabilities, Cardinality, OutputFormat};

/// The transactional facade handed to the callback. Cloneable so the
/// callback can move it into spawned sub-tasks; all clones share the one
/// pinned connection and go inert together.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

struct TxInner {
    handle: tokio::sync::Mutex<Option<PoolHandle>>,
    state: SessionState,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Transaction {
    fn new(handle: PoolHandle, state: SessionState, cancel: CancellationToken) -> Self {
        Transaction {
            inner: Arc::new(TxInner {
                handle: tokio::sync::Mutex::new(Some(handle)),
                state,
                cancel,
                closed: AtomicBool::new(false),
            }),
        }
    }

    async fn run(
        &self,
        text: &str,
        args: Arguments,
        cardinality: Cardinality,
        format: OutputFormat,
    ) -> Result<QueryOutcome> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PeridotError::TransactionClosed);
        }
        let mut guard = self.inner.handle.lock().await;
        let handle = guard.as_mut().ok_or(PeridotError::TransactionClosed)?;
        let pool = handle.pool().clone();
        let request = QueryRequest::new(text, cardinality, format);
        handle
            .connection()
            .execute_request(
                &request,
                &args,
                &self.inner.state,
                pool.cache_ref(),
                &self.inner.cancel,
            )
            .await
    }

    pub async fn query<T: Queryable>(
        &self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<Vec<T>> {
        let outcome = self
            .run(query, args.into(), Cardinality::Many, OutputFormat::Binary)
            .await?;
        outcome.values.into_iter().map(T::from_value).collect()
    }

    pub async fn query_single<T: Queryable>(
        &self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<Option<T>> {
        let outcome = self
            .run(
                query,
                args.into(),
                Cardinality::AtMostOne,
                OutputFormat::Binary,
            )
            .await?;
        super::single_from(outcome.values)
    }

    pub async fn query_required_single<T: Queryable>(
        &self,
        query: &str,
        args: impl Into<Arguments>,
    ) -> Result<T> {
        self.query_single(query, args)
            .await?
            .ok_or(PeridotError::NoDataReturned)
    }

    pub async fn query_json(&self, query: &str, args: impl Into<Arguments>) -> Result<Json> {
        let outcome = self
            .run(query, args.into(), Cardinality::Many, OutputFormat::Json)
            .await?;
        super::json_from(outcome.values)
    }

    pub async fn execute(&self, query: &str, args: impl Into<Arguments>) -> Result<()> {
        self.run(query, args.into(), Cardinality::Many, OutputFormat::None)
            .await?;
        Ok(())
    }

    /// Marks the facade inert and takes the pinned connection back.
    async fn close(&self) -> Option<PoolHandle> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.handle.lock().await.take()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Which retry budget an error draws from, if any.
fn retry_condition(error: &PeridotError) -> Option<RetryCondition> {
    if !error.is_retryable() {
        return None;
    }
    match error {
        PeridotError::Server(e) if e.code >> 24 == 0x05 => {
            Some(RetryCondition::TransactionConflict)
        }
        PeridotError::Server(_) => Some(RetryCondition::NetworkError),
        e if e.kind() == ErrorKind::Transport => Some(RetryCondition::NetworkError),
        _ => None,
    }
}

/// Runs `body` inside a transaction, retrying per `retry` on retryable
/// failures. The callback may run several times; it must be idempotent up
/// to the transaction's own effects.
pub(crate) async fn run_transaction<T, B, F>(
    pool: &Pool,
    state: &SessionState,
    options: &TransactionOptions,
    retry: &RetryOptions,
    cancel: &CancellationToken,
    mut body: B,
) -> Result<T>
where
    B: FnMut(Transaction) -> F,
    F: Future<Output = Result<T>>,
{
    let mut conflict_failures = 0u32;
    let mut network_failures = 0u32;

    loop {
        let error = match attempt(pool, state, options, cancel, &mut body).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(condition) = retry_condition(&error) else {
            return Err(error);
        };
        let failures = match condition {
            RetryCondition::TransactionConflict => &mut conflict_failures,
            RetryCondition::NetworkError => &mut network_failures,
        };
        *failures += 1;
        let rule = retry.rule(condition);
        if *failures >= rule.attempts {
            debug!(?condition, failures, "transaction retry budget exhausted");
            return Err(error);
        }
        let backoff = rule.backoff(*failures);
        warn!(error = %error, ?condition, "retrying transaction in {backoff:?}");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PeridotError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

async fn attempt<T, B, F>(
    pool: &Pool,
    state: &SessionState,
    options: &TransactionOptions,
    cancel: &CancellationToken,
    body: &mut B,
) -> Result<T>
where
    B: FnMut(Transaction) -> F,
    F: Future<Output = Result<T>>,
{
    let mut handle = pool.acquire(cancel).await?;
    let pool_inner = handle.pool().clone();

    let start = options.start_statement();
    let request = QueryRequest::new(&start, Cardinality::NoResult, OutputFormat::None)
        .capabilities(Capabilities::TRANSACTION);
    handle
        .connection()
        .execute_request(&request, &Arguments::None, state, pool_inner.cache_ref(), cancel)
        .await?;

    let tx = Transaction::new(handle, state.clone(), cancel.clone());
    let result = body(tx.clone()).await;
    let handle = tx.close().await;

    match (result, handle) {
        (Ok(value), Some(mut handle)) => {
            let request = QueryRequest::new("commit", Cardinality::NoResult, OutputFormat::None)
                .capabilities(Capabilities::TRANSACTION);
            handle
                .connection()
                .execute_request(
                    &request,
                    &Arguments::None,
                    state,
                    pool_inner.cache_ref(),
                    cancel,
                )
                .await?;
            Ok(value)
        }
        (Err(e), Some(mut handle)) => {
            // Callback failed: roll back best-effort. A rollback failure
            // poisons the connection, which the handle's drop handles.
            let request =
                QueryRequest::new("rollback", Cardinality::NoResult, OutputFormat::None)
                    .capabilities(Capabilities::TRANSACTION);
            if let Err(rollback_err) = handle
                .connection()
                .execute_request(
                    &request,
                    &Arguments::None,
                    state,
                    pool_inner.cache_ref(),
                    cancel,
                )
                .await
            {
                warn!(error = %rollback_err, "rollback after failed transaction body failed");
            }
            Err(e)
        }
        (Ok(_), None) => Err(PeridotError::TransactionClosed),
        (Err(e), None) => Err(e),
    }
}
