//! Alert Manager: one open alert per component, bounded history
//!
//! `open` is idempotent: while a component has an open alert, further
//! opens return the existing id and send nothing. `resolve` closes the
//! alert and bumps nothing if none is open. Both only enqueue
//! notifications; they never wait on delivery.

mod notify;

pub use notify::{
    notifiers_from_config, Notification, NotificationDispatcher, NotificationKind, Notifier,
    NotifyError, SmtpNotifier, WebhookNotifier,
};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::collector::{counters, MetricsCollector};
use crate::storage::AuditStore;
use crate::types::{Alert, Severity};

pub struct AlertManager {
    active: DashMap<String, Alert>,
    episodes: DashMap<String, u64>,
    history: Mutex<VecDeque<Alert>>,
    history_limit: usize,
    notify_tx: Option<mpsc::Sender<Notification>>,
    store: Arc<dyn AuditStore>,
    collector: Arc<MetricsCollector>,
}

impl AlertManager {
    /// `notify_tx` is `None` when no notification channel is enabled
    pub fn new(
        history_limit: usize,
        notify_tx: Option<mpsc::Sender<Notification>>,
        store: Arc<dyn AuditStore>,
        collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            active: DashMap::new(),
            episodes: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
            notify_tx,
            store,
            collector,
        }
    }

    /// Open an alert for `component`, or return the id of the one already open
    pub fn open(
        &self,
        component: &str,
        severity: Severity,
        message: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> String {
        let alert = match self.active.entry(component.to_string()) {
            Entry::Occupied(existing) => return existing.get().id.clone(),
            Entry::Vacant(slot) => {
                let episode = {
                    let mut ep = self.episodes.entry(component.to_string()).or_insert(0);
                    *ep += 1;
                    *ep
                };
                let alert = Alert {
                    id: Alert::episode_id(component, episode),
                    severity,
                    component: component.to_string(),
                    message: message.into(),
                    metadata,
                    created_at: Utc::now(),
                    resolved: false,
                    resolved_at: None,
                };
                slot.insert(alert.clone());
                alert
            }
        };

        error!(
            alert = %alert.id,
            component,
            severity = %alert.severity,
            message = %alert.message,
            "🚨 Alert opened"
        );
        self.collector.incr(counters::ALERTS_OPENED);
        self.record(&alert);
        self.enqueue(NotificationKind::Opened, alert.clone());
        alert.id
    }

    /// Close the open alert for `component`; `None` if there was none
    pub fn resolve(&self, component: &str) -> Option<Alert> {
        let (_, mut alert) = self.active.remove(component)?;
        alert.resolved = true;
        alert.resolved_at = Some(Utc::now());

        info!(
            alert = %alert.id,
            component,
            open_secs = alert.duration_secs(),
            "✅ Alert resolved"
        );
        self.collector.incr(counters::ALERTS_RESOLVED);
        self.record(&alert);
        self.enqueue(NotificationKind::Resolved, alert.clone());
        Some(alert)
    }

    /// Open alerts, oldest first
    pub fn list_active(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.iter().map(|a| a.value().clone()).collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    pub fn active_for(&self, component: &str) -> Option<Alert> {
        self.active.get(component).map(|a| a.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Alert open/resolve events, most recent first
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        self.lock_history().iter().rev().take(limit).cloned().collect()
    }

    fn record(&self, alert: &Alert) {
        if let Err(e) = self.store.record_alert(alert) {
            warn!(backend = self.store.backend_name(), error = %e, "Failed to persist alert");
        }
        let mut history = self.lock_history();
        history.push_back(alert.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    fn enqueue(&self, kind: NotificationKind, alert: Alert) {
        let Some(ref tx) = self.notify_tx else {
            return;
        };
        if let Err(e) = tx.try_send(Notification { kind, alert }) {
            self.collector.incr(counters::NOTIFICATIONS_DROPPED);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "dispatcher stopped",
            };
            warn!(reason, "Notification dropped");
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        match self.history.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Alert history lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    fn manager(tx: Option<mpsc::Sender<Notification>>) -> (AlertManager, Arc<MetricsCollector>) {
        let collector = Arc::new(MetricsCollector::new());
        let mgr = AlertManager::new(10, tx, Arc::new(InMemoryStore::new()), collector.clone());
        (mgr, collector)
    }

    #[test]
    fn test_open_is_idempotent() {
        let (mgr, collector) = manager(None);
        let a = mgr.open("db", Severity::Critical, "db down", BTreeMap::new());
        let b = mgr.open("db", Severity::Warning, "db still down", BTreeMap::new());
        assert_eq!(a, b);
        assert_eq!(mgr.list_active().len(), 1);
        assert_eq!(mgr.list_active()[0].message, "db down");
        assert_eq!(collector.counter(counters::ALERTS_OPENED), 1);
    }

    #[test]
    fn test_resolve_once_then_new_episode() {
        let (mgr, collector) = manager(None);
        let first = mgr.open("db", Severity::Critical, "down", BTreeMap::new());
        let resolved = mgr.resolve("db").unwrap();
        assert!(resolved.resolved);
        assert!(resolved.resolved_at.is_some());
        assert!(mgr.resolve("db").is_none());
        assert_eq!(collector.counter(counters::ALERTS_RESOLVED), 1);

        let second = mgr.open("db", Severity::Critical, "down again", BTreeMap::new());
        assert_ne!(first, second);
        assert_eq!(second, "db#2");
    }

    #[test]
    fn test_history_bounded_and_ordered() {
        let (mgr, _) = manager(None);
        for i in 0..8 {
            let component = format!("svc-{}", i);
            mgr.open(&component, Severity::Info, "x", BTreeMap::new());
            mgr.resolve(&component);
        }
        let history = mgr.history(100);
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].component, "svc-7");
        assert!(history[0].resolved);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let (mgr, collector) = manager(Some(tx));

        mgr.open("a", Severity::Critical, "a down", BTreeMap::new());
        mgr.open("b", Severity::Critical, "b down", BTreeMap::new());

        assert_eq!(mgr.active_count(), 2);
        assert_eq!(collector.counter(counters::NOTIFICATIONS_DROPPED), 1);
        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, NotificationKind::Opened);
        assert_eq!(first.alert.component, "a");
    }

    #[test]
    fn test_closed_queue_does_not_fail_open() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let (mgr, _) = manager(Some(tx));
        let id = mgr.open("a", Severity::Critical, "down", BTreeMap::new());
        assert_eq!(id, "a#1");
        assert!(mgr.resolve("a").is_some());
    }
}
