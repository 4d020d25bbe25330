// src/config.rs

//! Driver configuration: the connection record handed in by discovery
//! collaborators, pool sizing, timeouts, and the retry/transaction policies.
//!
//! The driver never parses project or credential files itself; it consumes a
//! fully-resolved [`ConnectionConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PeridotError, Result};

/// How strictly the TLS layer verifies the server.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsSecurity {
    /// Verify the certificate chain and the server name.
    #[default]
    Strict,
    /// Verify the certificate chain but not the server name.
    NoHostVerification,
    /// Accept any certificate. Only for development setups.
    Insecure,
    /// Plaintext TCP without TLS. Only for local development servers and
    /// in-process test peers.
    Disabled,
}

/// Transport flavor for the client. The core implements the TCP binary
/// protocol; HTTP tunneling is recognized but handled by an outer layer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[default]
    Tcp,
    Http,
}

/// A fully-resolved connection record: everything needed to reach and
/// authenticate against one server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub database: String,
    /// Server-side branch name; defaults to the database name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub tls_security: TlsSecurity,
    /// PEM bytes of a custom CA, if the deployment uses one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_ca: Option<Vec<u8>>,
    /// Overrides the SNI/verification name when it differs from `host`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_server_name: Option<String>,
    /// How long to keep dialing an unavailable server before giving up.
    #[serde(default = "default_wait_until_available", with = "duration_secs")]
    pub wait_until_available: Duration,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: "edgedb".to_string(),
            password: None,
            database: "edgedb".to_string(),
            branch: None,
            tls_security: TlsSecurity::default(),
            tls_ca: None,
            tls_server_name: None,
            wait_until_available: default_wait_until_available(),
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn tls_security(mut self, security: TlsSecurity) -> Self {
        self.tls_security = security;
        self
    }

    pub fn tls_ca(mut self, pem: Vec<u8>) -> Self {
        self.tls_ca = Some(pem);
        self
    }

    pub fn tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.tls_server_name = Some(name.into());
        self
    }

    pub fn wait_until_available(mut self, wait: Duration) -> Self {
        self.wait_until_available = wait;
        self
    }

    /// The branch actually sent in the handshake.
    pub fn effective_branch(&self) -> &str {
        self.branch.as_deref().unwrap_or(&self.database)
    }

    /// The name used for TLS verification and SNI.
    pub fn effective_server_name(&self) -> &str {
        self.tls_server_name.as_deref().unwrap_or(&self.host)
    }
}

/// Conditions the retry policy distinguishes. Each can carry its own
/// attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetryCondition {
    /// Serialization failures and transaction conflicts.
    TransactionConflict,
    /// Network failures before the first data frame.
    NetworkError,
}

/// Per-condition retry rule: attempt cap plus exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryRule {
    pub attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryRule {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryRule {
    /// Backoff before attempt number `attempt` (1-based count of failures so
    /// far): exponential growth with full jitter, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let exp = self.base_backoff.saturating_mul(1u32 << attempt.min(16));
        let cap = exp.min(self.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.5..1.0);
        cap.mul_f64(jitter)
    }
}

/// The retry policy for transactions and idempotent reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    pub conflict: RetryRule,
    pub network: RetryRule,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            conflict: RetryRule::default(),
            network: RetryRule::default(),
        }
    }
}

impl RetryOptions {
    pub fn rule(&self, condition: RetryCondition) -> &RetryRule {
        match condition {
            RetryCondition::TransactionConflict => &self.conflict,
            RetryCondition::NetworkError => &self.network,
        }
    }

    pub fn with_rule(mut self, condition: RetryCondition, rule: RetryRule) -> Self {
        match condition {
            RetryCondition::TransactionConflict => self.conflict = rule,
            RetryCondition::NetworkError => self.network = rule,
        }
        self
    }
}

/// Transaction isolation levels understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Serializable,
    RepeatableRead,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "serializable",
            IsolationLevel::RepeatableRead => "repeatable read",
        }
    }
}

/// Options applied to every transaction started from a client facade.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    /// The `start transaction` statement these options describe.
    pub fn start_statement(&self) -> String {
        let mut stmt = format!("start transaction isolation {}", self.isolation.as_sql());
        stmt.push_str(if self.read_only {
            ", read only"
        } else {
            ", read write"
        });
        if self.deferrable {
            stmt.push_str(", deferrable");
        }
        stmt
    }
}

/// Pool and per-command behavior of a [`Client`](crate::client::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hard cap on live connections. `None` adopts the server's suggested
    /// pool size, falling back to [`ClientConfig::DEFAULT_MAX_CONNECTIONS`].
    pub max_connections: Option<usize>,
    /// How long `acquire` waits for a free connection.
    pub connection_timeout: Duration,
    /// Per-command execution timeout.
    pub command_timeout: Option<Duration>,
    pub retry: RetryOptions,
    pub client_type: ClientType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections: None,
            connection_timeout: Duration::from_secs(60),
            command_timeout: None,
            retry: RetryOptions::default(),
            client_type: ClientType::default(),
        }
    }
}

impl ClientConfig {
    pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == Some(0) {
            return Err(PeridotError::ArgumentMismatch(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.client_type == ClientType::Http {
            return Err(PeridotError::Unsupported(
                "HTTP tunneling is not handled by the binary core".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_wait_until_available() -> Duration {
    Duration::from_secs(30)
}

/// Serializes `wait_until_available` as whole seconds in config dumps.
mod duration_secs {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
