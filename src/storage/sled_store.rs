//! Sled-backed audit store
//!
//! One tree per record kind. Keys are big-endian nanosecond timestamps
//! followed by a sled-generated id, so iteration order is chronological and
//! events in the same nanosecond never collide. Values are JSON.
//!
//! Inserts are not flushed one by one. sled writes dirty pages in the
//! background every `FLUSH_EVERY_MS`, and the engine calls `flush` on stop.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

use super::{AuditStore, StoreError};
use crate::types::{Alert, RecoveryAttempt};

const ALERTS_TREE: &str = "alerts";
const ATTEMPTS_TREE: &str = "recovery_attempts";
const FLUSH_EVERY_MS: u64 = 500;

/// Durable audit store
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    alerts: sled::Tree,
    attempts: sled::Tree,
}

impl SledStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(Some(FLUSH_EVERY_MS))
            .open()?;
        let alerts = db.open_tree(ALERTS_TREE)?;
        let attempts = db.open_tree(ATTEMPTS_TREE)?;

        tracing::info!(path = %path.display(), "Audit store opened");

        Ok(Self { db, alerts, attempts })
    }

    fn key(&self, at: DateTime<Utc>) -> Result<[u8; 16], StoreError> {
        let nanos = at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| at.timestamp() * 1_000_000_000);
        let id = self.db.generate_id()?;

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&nanos.to_be_bytes());
        key[8..].copy_from_slice(&id.to_be_bytes());
        Ok(key)
    }

    fn insert<T: Serialize>(
        &self,
        tree: &sled::Tree,
        at: DateTime<Utc>,
        value: &T,
    ) -> Result<(), StoreError> {
        let key = self.key(at)?;
        let value = serde_json::to_vec(value)?;
        tree.insert(key, value)?;
        Ok(())
    }

    fn recent<T: DeserializeOwned>(tree: &sled::Tree, limit: usize) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();

        // Iterate in reverse order (most recent first)
        for item in tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            match serde_json::from_slice::<T>(&value) {
                Ok(record) => out.push(record),
                Err(e) => {
                    tracing::warn!(tree = ?tree.name(), error = %e, "Skipping unreadable audit record");
                }
            }
        }

        Ok(out)
    }
}

impl AuditStore for SledStore {
    fn record_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let at = alert.resolved_at.unwrap_or(alert.created_at);
        self.insert(&self.alerts, at, alert)
    }

    fn record_attempt(&self, attempt: &RecoveryAttempt) -> Result<(), StoreError> {
        self.insert(&self.attempts, attempt.started_at, attempt)
    }

    fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        Self::recent(&self.alerts, limit)
    }

    fn recent_attempts(&self, limit: usize) -> Result<Vec<RecoveryAttempt>, StoreError> {
        Self::recent(&self.attempts, limit)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn make_alert(component: &str, created_at: DateTime<Utc>) -> Alert {
        Alert {
            id: Alert::episode_id(component, 1),
            severity: Severity::Warning,
            component: component.to_string(),
            message: "probe failing".to_string(),
            metadata: BTreeMap::new(),
            created_at,
            resolved: false,
            resolved_at: None,
        }
    }

    #[test]
    fn test_alerts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utc::now();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.record_alert(&make_alert("db", base)).unwrap();
            store
                .record_alert(&make_alert("cache", base + Duration::seconds(5)))
                .unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        let alerts = store.recent_alerts(10).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].component, "cache");
        assert_eq!(alerts[1].component, "db");
    }

    #[test]
    fn test_same_timestamp_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let at = Utc::now();
        let attempt = RecoveryAttempt {
            action: "restart".to_string(),
            component: "db".to_string(),
            started_at: at,
            duration_ms: 1,
            success: false,
            error: Some("boom".to_string()),
        };
        store.record_attempt(&attempt).unwrap();
        store.record_attempt(&attempt).unwrap();
        assert_eq!(store.recent_attempts(10).unwrap().len(), 2);
        assert_eq!(store.recent_attempts(1).unwrap().len(), 1);
    }
}
