// src/client/pool.rs

//! The connection pool: amortizes connection setup, bounds concurrency,
//! and recovers from transient failures.
//!
//! Borrowed connections come back through an RAII handle. A healthy
//! connection (`Ready`, not in a transaction) rejoins the idle set; a
//! connection abandoned inside a transaction is rolled back first; a
//! poisoned connection is destroyed. Waiters queue FIFO on a fair
//! semaphore.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::state::SessionState;
use crate::codec::{Arguments, QueryCache};
use crate::config::{ClientConfig, ConnectionConfig, RetryCondition};
use crate::connection::{QueryRequest, RawConnection};
use crate::errors::{PeridotError, Result};
use crate::protocol::{Capabilities, Cardinality, OutputFormat, TransactionStatus};

pub(crate) struct PoolInner {
    pub(crate) connect_config: ConnectionConfig,
    pub(crate) client_config: ClientConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<RawConnection>>,
    /// Current permit total, tracked for the one-shot adoption of the
    /// server-suggested size.
    capacity: AtomicUsize,
    capacity_adopted: AtomicBool,
    live: AtomicUsize,
    closed: AtomicBool,
    pub(crate) cache: QueryCache,
}

/// A dynamically sized pool of connections to one server.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(connect_config: ConnectionConfig, client_config: ClientConfig) -> Result<Self> {
        client_config.validate()?;
        let capacity = client_config
            .max_connections
            .unwrap_or(ClientConfig::DEFAULT_MAX_CONNECTIONS);
        Ok(Pool {
            inner: Arc::new(PoolInner {
                connect_config,
                client_config,
                semaphore: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(VecDeque::new()),
                capacity: AtomicUsize::new(capacity),
                capacity_adopted: AtomicBool::new(false),
                live: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                cache: QueryCache::new(),
            }),
        })
    }

    pub fn command_timeout(&self) -> Option<std::time::Duration> {
        self.inner.client_config.command_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Live connections (idle + borrowed).
    pub fn size(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Borrows a connection, waiting FIFO under contention. Fails with
    /// [`PeridotError::AcquireTimeout`] after the configured
    /// `connection_timeout`, or [`PeridotError::Cancelled`] if the token
    /// fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<PoolHandle> {
        if self.is_closed() {
            return Err(PeridotError::PoolClosed);
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PeridotError::Cancelled),
            permit = tokio::time::timeout(
                self.inner.client_config.connection_timeout,
                self.inner.semaphore.clone().acquire_owned(),
            ) => match permit {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PeridotError::PoolClosed),
                Err(_) => return Err(PeridotError::AcquireTimeout),
            },
        };

        // Reuse an idle connection if a healthy one is available.
        loop {
            let conn = { self.inner.idle.lock().pop_front() };
            match conn {
                Some(conn) if conn.is_healthy() => {
                    return Ok(PoolHandle {
                        conn: Some(conn),
                        pool: self.inner.clone(),
                        permit: Some(permit),
                    });
                }
                Some(conn) => {
                    debug!("discarding unhealthy idle connection");
                    self.destroy(conn);
                }
                None => break,
            }
        }

        let conn = self.connect_with_wait(cancel).await?;
        self.inner.live.fetch_add(1, Ordering::AcqRel);
        self.adopt_suggested_capacity(&conn);
        Ok(PoolHandle {
            conn: Some(conn),
            pool: self.inner.clone(),
            permit: Some(permit),
        })
    }

    /// Dials the server, retrying transient failures until
    /// `wait_until_available` elapses.
    async fn connect_with_wait(&self, cancel: &CancellationToken) -> Result<RawConnection> {
        let deadline = Instant::now() + self.inner.connect_config.wait_until_available;
        let rule = self.inner.client_config.retry.rule(RetryCondition::NetworkError);
        let mut attempt = 0u32;
        loop {
            match RawConnection::connect(&self.inner.connect_config, cancel).await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_retryable() && Instant::now() < deadline => {
                    attempt += 1;
                    let backoff = rule.backoff(attempt);
                    warn!(error = %e, attempt, "server unavailable, retrying in {backoff:?}");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PeridotError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Adopts the server's suggested pool size once, when the user left
    /// `max_connections` unset.
    fn adopt_suggested_capacity(&self, conn: &RawConnection) {
        if self.inner.client_config.max_connections.is_some() {
            return;
        }
        let Some(suggested) = conn.suggested_pool_size() else {
            return;
        };
        if suggested == 0
            || self
                .inner
                .capacity_adopted
                .swap(true, Ordering::AcqRel)
        {
            return;
        }
        let current = self.inner.capacity.load(Ordering::Acquire);
        if suggested > current {
            self.inner.semaphore.add_permits(suggested - current);
        } else if suggested < current {
            self.inner.semaphore.forget_permits(current - suggested);
        }
        self.inner.capacity.store(suggested, Ordering::Release);
        debug!(suggested, "adopted server-suggested pool size");
    }

    fn destroy(&self, conn: RawConnection) {
        self.inner.destroy(conn);
    }

    /// Closes the pool: no new borrows, idle connections say goodbye.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let drained: Vec<RawConnection> = {
            let mut idle = self.inner.idle.lock();
            idle.drain(..).collect()
        };
        for conn in drained {
            self.inner.live.fetch_sub(1, Ordering::AcqRel);
            conn.terminate().await;
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("live", &self.size())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    pub(crate) fn cache_ref(&self) -> &QueryCache {
        &self.cache
    }

    fn destroy(&self, conn: RawConnection) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        // Dropping the connection closes the socket; a graceful Terminate
        // is only worth attempting from an async context.
        drop(conn);
    }

    fn release_idle(&self, conn: RawConnection) {
        if self.closed.load(Ordering::Acquire) {
            self.destroy(conn);
            return;
        }
        self.idle.lock().push_back(conn);
    }
}

/// A borrowed connection. Dropping the handle returns the connection to
/// the pool if it is healthy, rolls back an abandoned transaction first,
/// or destroys the connection otherwise.
pub struct PoolHandle {
    conn: Option<RawConnection>,
    pool: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PoolHandle {
    pub fn connection(&mut self) -> &mut RawConnection {
        self.conn
            .as_mut()
            .expect("connection is present until drop")
    }

    pub(crate) fn pool(&self) -> &Arc<PoolInner> {
        &self.pool
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();

        if conn.is_healthy() {
            self.pool.release_idle(conn);
            drop(permit);
            return;
        }

        match conn.transaction_status() {
            // Abandoned mid-transaction: roll back before the connection
            // may rejoin the idle set. The permit travels with the task so
            // capacity is not handed out twice.
            TransactionStatus::InTransaction | TransactionStatus::InFailedTransaction
                if conn.phase() == crate::connection::ConnectionPhase::Ready =>
            {
                let pool = self.pool.clone();
                tokio::spawn(async move {
                    rollback_and_release(pool, conn).await;
                    drop(permit);
                });
            }
            _ => {
                debug!(phase = ?conn.phase(), "destroying connection on release");
                self.pool.destroy(conn);
                drop(permit);
            }
        }
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle").field("conn", &self.conn).finish()
    }
}

/// Best-effort rollback for a connection released inside a transaction;
/// failure to roll back destroys the connection.
async fn rollback_and_release(pool: Arc<PoolInner>, mut conn: RawConnection) {
    let request = QueryRequest::new("rollback", Cardinality::NoResult, OutputFormat::None)
        .capabilities(Capabilities::TRANSACTION);
    let cancel = CancellationToken::new();
    let result = conn
        .execute_request(
            &request,
            &Arguments::None,
            &SessionState::default(),
            &pool.cache,
            &cancel,
        )
        .await;
    match result {
        Ok(_) if conn.is_healthy() => {
            debug!("rolled back abandoned transaction");
            pool.release_idle(conn);
        }
        Ok(_) => pool.destroy(conn),
        Err(e) => {
            warn!(error = %e, "rollback of abandoned transaction failed");
            pool.destroy(conn);
        }
    }
}
