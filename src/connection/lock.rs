// src/connection/lock.rs

//! The per-connection command lock. The protocol is half-duplex per
//! command, so any frame exchange requires holding this single-holder
//! lock. Waiters queue fairly: a strictly later attempt never overtakes an
//! earlier one.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::errors::{PeridotError, Result};

/// Single-holder lock with cancellation-aware acquisition.
#[derive(Debug, Clone, Default)]
pub struct CommandLock {
    inner: Arc<Mutex<()>>,
}

/// Held for the duration of one command cycle; released on drop, including
/// on error paths and when the holder is cancelled.
#[derive(Debug)]
pub struct CommandGuard {
    _guard: OwnedMutexGuard<()>,
}

impl CommandLock {
    pub fn new() -> Self {
        CommandLock {
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Suspends until the lock is free or `cancel` fires, whichever comes
    /// first. Cancellation of a waiter leaves the lock with its current
    /// holder untouched.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<CommandGuard> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PeridotError::Cancelled),
            guard = self.inner.clone().lock_owned() => Ok(CommandGuard { _guard: guard }),
        }
    }

    /// Non-suspending acquisition attempt.
    pub fn try_acquire(&self) -> Option<CommandGuard> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| CommandGuard { _guard: guard })
    }

    /// True if some task currently holds the lock. Advisory only; the
    /// answer can be stale by the time the caller acts on it.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
