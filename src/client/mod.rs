// src/client/mod.rs

//! The public client surface: a cheaply-cloneable facade over a shared
//! connection pool, carrying immutable per-facade session state and the
//! transaction/retry policies.
//!
//! Facade derivation (`with_module`, `with_config`, ...) never mutates the
//! parent: each call produces a new `Client` sharing the same pool with a
//! structurally-copied state.

pub mod pool;
pub mod state;
pub mod transaction;

use std::future::Future;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

pub use pool::{Pool, PoolHandle};
pub use state::SessionState;
pub use transaction::Transaction;

use crate::codec::{Arguments, Queryable, Value};
use crate::config::{
    ClientConfig, ConnectionConfig, RetryCondition, RetryOptions, TransactionOptions,
};
use crate::connection::{ConnectionPhase, QueryOutcome, QueryRequest};
use crate::errors::{ErrorKind, PeridotError, Result};
use crate::model::Json;
use crate::protocol::{Cardinality, OutputFormat};

/// A pooled client for one server.
#[derive(Clone)]
pub struct Client {
    pool: Pool,
    state: SessionState,
    tx_options: TransactionOptions,
    retry: RetryOptions,
}

impl Client {
    pub fn new(connect_config: ConnectionConfig, client_config: ClientConfig) -> Result<Self> {
        let retry = client_config.retry.clone();
        Ok(Client {
            pool: Pool::new(connect_config, client_config)?,
            state: SessionState::new(),
            tx_options: TransactionOptions::default(),
            retry,
        })
    }

    /// The session state this facade attaches to every command.
    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    // --- Facade derivation -------------------------------------------------

    pub fn with_module(&self, module: impl Into<String>) -> Client {
        Client {
            state: self.state.with_module(module),
            ..self.clone()
        }
    }

    pub fn with_aliases<I, K, V>(&self, aliases: I) -> Client
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Client {
            state: self.state.with_aliases(aliases),
            ..self.clone()
        }
    }

    pub fn with_config<I, K>(&self, config: I) -> Client
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Client {
            state: self.state.with_config(config),
            ..self.clone()
        }
    }

    pub fn with_globals<I, K>(&self, globals: I) -> Client
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Client {
            state: self.state.with_globals(globals),
            ..self.clone()
        }
    }

    pub fn with_transaction_options(&self, options: TransactionOptions) -> Client {
        Client {
            tx_options: options,
            ..self.clone()
        }
    }

    pub fn with_retry_options(&self, retry: RetryOptions) -> Client {
        Client {
            retry,
            ..self.clone()
        }
    }

    // --- Query surface -----------------------------------------------------

    /// Runs one command, transparently reconnecting and retrying on
    /// network failures that occur before any data was returned.
    async fn run(
        &self,
        text: &str,
        args: Arguments,
        cardinality: Cardinality,
        format: OutputFormat,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome> {
        let rule = self.retry.rule(RetryCondition::NetworkError);
        let mut failures = 0u32;
        loop {
            let result = self.run_once(text, &args, cardinality, format, cancel).await;
            match result {
                Err(e)
                    if e.kind() == ErrorKind::Transport
                        && e.is_retryable()
                        && failures + 1 < rule.attempts =>
                {
                    failures += 1;
                    let backoff = rule.backoff(failures);
                    tracing::debug!(error = %e, failures, "network failure, retrying in {backoff:?}");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PeridotError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                other => return other,
            }
        }
    }

    async fn run_once(
        &self,
        text: &str,
        args: &Arguments,
        cardinality: Cardinality,
        format: OutputFormat,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome> {
        let mut handle = self.pool.acquire(cancel).await?;
        let pool_inner = handle.pool().clone();
        let request = QueryRequest::new(text, cardinality, format);

        match self.pool.command_timeout() {
            Some(limit) => {
                let executed = tokio::time::timeout(
                    limit,
                    handle.connection().execute_request(
                        &request,
                        args,
                        &self.state,
                        pool_inner.cache_ref(),
                        cancel,
                    ),
                )
                .await;
                match executed {
                    Ok(result) => result,
                    Err(_) => {
                        // The command is still in flight on the wire; the
                        // connection cannot be reused.
                        handle.connection().phase = ConnectionPhase::Errored;
                        Err(PeridotError::ConnectionTimeout)
                    }
                }
            }
            None => {
                handle
                    .connection()
                    .execute_request(&request, args, &self.state, pool_inner.cache_ref(), cancel)
                    .await
            }
        }
    }

    /// Runs a query and returns every result.
    pub async fn query<T: Queryable>(
        &self,
        query: &str,
        args: impl Into<Arguments>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let outcome = self
            .run(
                query,
                args.into(),
                Cardinality::Many,
                OutputFormat::Binary,
                cancel,
            )
            .await?;
        outcome.values.into_iter().map(T::from_value).collect()
    }

    /// Runs a query expected to return at most one result.
    pub async fn query_single<T: Queryable>(
        &self,
        query: &str,
        args: impl Into<Arguments>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        let outcome = self
            .run(
                query,
                args.into(),
                Cardinality::AtMostOne,
                OutputFormat::Binary,
                cancel,
            )
            .await?;
        single_from(outcome.values)
    }

    /// Runs a query that must return exactly one result.
    pub async fn query_required_single<T: Queryable>(
        &self,
        query: &str,
        args: impl Into<Arguments>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.query_single(query, args, cancel)
            .await?
            .ok_or(PeridotError::NoDataReturned)
    }

    /// Runs a query with JSON output; the result is always one JSON array
    /// document.
    pub async fn query_json(
        &self,
        query: &str,
        args: impl Into<Arguments>,
        cancel: &CancellationToken,
    ) -> Result<Json> {
        let outcome = self
            .run(
                query,
                args.into(),
                Cardinality::Many,
                OutputFormat::Json,
                cancel,
            )
            .await?;
        json_from(outcome.values)
    }

    pub async fn query_single_json(
        &self,
        query: &str,
        args: impl Into<Arguments>,
        cancel: &CancellationToken,
    ) -> Result<Option<Json>> {
        let outcome = self
            .run(
                query,
                args.into(),
                Cardinality::AtMostOne,
                OutputFormat::Json,
                cancel,
            )
            .await?;
        match single_from::<Value>(outcome.values)? {
            Some(Value::Json(json)) => Ok(Some(json)),
            Some(other) => Err(PeridotError::DecodeError(format!(
                "expected json output, the server sent {}",
                other.kind_name()
            ))),
            None => Ok(None),
        }
    }

    pub async fn query_required_single_json(
        &self,
        query: &str,
        args: impl Into<Arguments>,
        cancel: &CancellationToken,
    ) -> Result<Json> {
        self.query_single_json(query, args, cancel)
            .await?
            .ok_or(PeridotError::NoDataReturned)
    }

    /// Runs a script for its side effects; no results are returned.
    pub async fn execute(
        &self,
        query: &str,
        args: impl Into<Arguments>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run(
            query,
            args.into(),
            Cardinality::Many,
            OutputFormat::None,
            cancel,
        )
        .await?;
        Ok(())
    }

    /// Runs `body` inside a transaction with this facade's options,
    /// retrying retryable failures per the retry policy.
    pub async fn transaction<T, B, F>(&self, cancel: &CancellationToken, body: B) -> Result<T>
    where
        B: FnMut(Transaction) -> F,
        F: Future<Output = Result<T>>,
    {
        transaction::run_transaction(
            &self.pool,
            &self.state,
            &self.tx_options,
            &self.retry,
            cancel,
            body,
        )
        .await
    }

    // --- Maintenance surface -----------------------------------------------

    /// Warms up the pool by establishing (or validating) one connection.
    pub async fn ensure_connected(&self, cancel: &CancellationToken) -> Result<()> {
        let _handle = self.pool.acquire(cancel).await?;
        Ok(())
    }

    /// Liveness probe: a `Sync` round trip on a pooled connection.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let mut handle = self.pool.acquire(cancel).await?;
        handle.connection().sync(cancel).await?;
        Ok(())
    }

    /// Streams a database dump; each block is handed to `on_block` in
    /// arrival order. Returns the dump header attributes.
    pub async fn dump(
        &self,
        cancel: &CancellationToken,
        on_block: impl FnMut(Bytes) -> Result<()>,
    ) -> Result<Vec<(String, Bytes)>> {
        let mut handle = self.pool.acquire(cancel).await?;
        handle.connection().dump(cancel, on_block).await
    }

    /// Restores a dump into the (empty) target database.
    pub async fn restore(
        &self,
        cancel: &CancellationToken,
        header: Bytes,
        blocks: impl IntoIterator<Item = Bytes>,
    ) -> Result<String> {
        let mut handle = self.pool.acquire(cancel).await?;
        handle.connection().restore(cancel, header, blocks).await
    }

    /// Closes the pool: in-flight borrows finish, idle connections say
    /// goodbye, new borrows fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// The pool backing this facade, shared with every derived facade.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.pool)
            .field("module", &self.state.module())
            .finish()
    }
}

/// At-most-one extraction shared by client and transaction surfaces.
pub(crate) fn single_from<T: Queryable>(values: Vec<Value>) -> Result<Option<T>> {
    let mut iter = values.into_iter();
    let first = iter.next();
    if iter.next().is_some() {
        return Err(PeridotError::TooManyResults);
    }
    first.map(T::from_value).transpose()
}

/// JSON-format results arrive as a single array document.
pub(crate) fn json_from(values: Vec<Value>) -> Result<Json> {
    let mut iter = values.into_iter();
    match (iter.next(), iter.next()) {
        (None, _) => Ok(Json::new_unchecked("[]".to_string())),
        (Some(Value::Json(json)), None) => Ok(json),
        (Some(other), None) => Err(PeridotError::DecodeError(format!(
            "expected json output, the server sent {}",
            other.kind_name()
        ))),
        (Some(_), Some(_)) => Err(PeridotError::ProtocolViolation(
            "json output must be a single document".to_string(),
        )),
    }
}
