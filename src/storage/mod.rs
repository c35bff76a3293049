//! Audit Storage: alert history and recovery ledger persistence
//!
//! The engine keeps its own bounded in-memory history; an `AuditStore`
//! receives a copy of every alert transition and recovery attempt so the
//! record can outlive the process:
//! - `InMemoryStore`: bounded, default backend
//! - `SledStore`: durable, opened when `[storage] path` is configured
//!
//! Store failures are logged by callers and never interrupt the engine.

mod sled_store;

pub use sled_store::SledStore;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::types::{Alert, RecoveryAttempt};

/// Default capacity of each in-memory record kind
const IN_MEMORY_LIMIT: usize = 1000;

/// Trait for pluggable audit backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across probe and recovery tasks.
pub trait AuditStore: Send + Sync {
    /// Record an alert open or resolve event
    fn record_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Record a recovery attempt
    fn record_attempt(&self, attempt: &RecoveryAttempt) -> Result<(), StoreError>;

    /// Recent alert events (most recent first)
    fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError>;

    /// Recent recovery attempts (most recent first)
    fn recent_attempts(&self, limit: usize) -> Result<Vec<RecoveryAttempt>, StoreError>;

    /// Push buffered writes to durable storage. Blocking; call it off the
    /// async workers.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

/// Open the configured backend.
///
/// A sled open failure degrades to the in-memory store so a bad path never
/// keeps the engine from starting.
pub fn open_store(path: Option<&Path>) -> Arc<dyn AuditStore> {
    match path {
        Some(path) => match SledStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open audit store, using in-memory history");
                Arc::new(InMemoryStore::new())
            }
        },
        None => Arc::new(InMemoryStore::new()),
    }
}

/// In-memory audit store
///
/// Thread-safe via `RwLock`. Not durable: data is lost on restart.
pub struct InMemoryStore {
    alerts: RwLock<VecDeque<Alert>>,
    attempts: RwLock<VecDeque<RecoveryAttempt>>,
    limit: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_limit(IN_MEMORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            alerts: RwLock::new(VecDeque::new()),
            attempts: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, limit: usize) {
    buf.push_back(item);
    while buf.len() > limit {
        buf.pop_front();
    }
}

impl AuditStore for InMemoryStore {
    fn record_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut store = self
            .alerts
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        push_bounded(&mut store, alert.clone(), self.limit);
        Ok(())
    }

    fn record_attempt(&self, attempt: &RecoveryAttempt) -> Result<(), StoreError> {
        let mut store = self
            .attempts
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        push_bounded(&mut store, attempt.clone(), self.limit);
        Ok(())
    }

    fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let store = self
            .alerts
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(store.iter().rev().take(limit).cloned().collect())
    }

    fn recent_attempts(&self, limit: usize) -> Result<Vec<RecoveryAttempt>, StoreError> {
        let store = self
            .attempts
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(store.iter().rev().take(limit).cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
