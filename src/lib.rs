// src/lib.rs

//! An asynchronous EdgeDB client driver.
//!
//! The crate is organized around three subsystems:
//!
//! - [`protocol`] and [`connection`]: the binary wire protocol engine
//!   (framing, the handshake/auth/command state machine, SCRAM-SHA-256).
//! - [`codec`]: the dynamic codec system that translates between wire bytes
//!   and user values, driven by server-supplied type descriptors.
//! - [`client`]: the pooled [`Client`](client::Client) facade, immutable
//!   session state, and transaction orchestration with retries.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod errors;
pub mod model;
pub mod protocol;

// Re-export the surface most callers need.
pub use client::{Client, SessionState, Transaction};
pub use codec::{Queryable, Value};
pub use config::{ClientConfig, ConnectionConfig, RetryOptions, TlsSecurity};
pub use errors::{PeridotError, Result};
// Cancellation handles are part of every public signature; spare callers
// the extra dependency.
pub use tokio_util::sync::CancellationToken;
