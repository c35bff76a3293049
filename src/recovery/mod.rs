//! Recovery Executor: single-flight remediation with exponential backoff
//!
//! Components are bound to named actions. `execute(component)`:
//! - joins the in-flight attempt if one is running (joiners get its outcome)
//! - returns `Throttled` while the component is inside its cooldown
//! - otherwise spawns the action under `recovery_timeout`
//!
//! Cooldown after n consecutive failed attempts is `base × 2^(n-1)`, capped;
//! after a success it is one `base`. The attempt runs in its own task so it
//! completes even if every caller is cancelled.

mod actions;

pub use actions::{
    action_from_config, CacheFlushAction, CommandAction, ContainerRestartAction, DiskCleanupAction,
    FnAction, WebhookAction,
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::collector::{counters, MetricsCollector};
use crate::config::defaults;
use crate::storage::AuditStore;
use crate::types::{RecoveryAttempt, RecoveryOutcome};

// ============================================================================
// Action Capability
// ============================================================================

/// Errors returned by recovery actions
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("http error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

/// Trait for remediation actions
///
/// Actions are opaque to the engine: they receive the component name and
/// report success or failure.
#[async_trait]
pub trait RecoveryAction: Send + Sync {
    /// Short kind label ("command", "webhook", ...)
    fn kind(&self) -> &'static str;

    async fn run(&self, component: &str) -> Result<(), ActionError>;
}

// ============================================================================
// Backoff
// ============================================================================

/// Cooldown policy between attempts for the same component
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Base used for components bound without their own base
    pub default_base: Duration,
    pub cap: Duration,
    pub max_exponent: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            default_base: Duration::from_secs(defaults::CHECK_INTERVAL_SECS),
            cap: Duration::from_secs(defaults::RECOVERY_BACKOFF_CAP_SECS),
            max_exponent: defaults::RECOVERY_MAX_BACKOFF_EXPONENT,
        }
    }
}

impl BackoffPolicy {
    /// Cooldown after an attempt, given the failure streak including it
    pub fn cooldown(&self, base: Duration, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return base.min(self.cap);
        }
        let exp = (consecutive_failures - 1).min(self.max_exponent);
        let factor = 1u32 << exp;
        base.saturating_mul(factor).min(self.cap)
    }
}

// ============================================================================
// Executor
// ============================================================================

type SharedOutcome = Shared<BoxFuture<'static, RecoveryOutcome>>;

struct Binding {
    action: String,
    base: Duration,
}

#[derive(Default)]
struct Slot {
    in_flight: Option<SharedOutcome>,
    consecutive_failures: u32,
    next_allowed: Option<Instant>,
    /// Bumped by `reset`; an attempt started under an older epoch leaves the
    /// backoff state alone when it finishes
    epoch: u64,
}

/// Executor settings, normally taken from `[engine]`
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub backoff: BackoffPolicy,
    pub timeout: Duration,
    pub ledger_limit: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            timeout: Duration::from_secs(defaults::RECOVERY_TIMEOUT_SECS),
            ledger_limit: defaults::ATTEMPT_HISTORY_LIMIT,
        }
    }
}

pub struct RecoveryExecutor {
    actions: DashMap<String, Arc<dyn RecoveryAction>>,
    bindings: DashMap<String, Binding>,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    ledger: Mutex<VecDeque<RecoveryAttempt>>,
    settings: ExecutorSettings,
    store: Arc<dyn AuditStore>,
    collector: Arc<MetricsCollector>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            warn!("Recovery executor lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl RecoveryExecutor {
    pub fn new(
        settings: ExecutorSettings,
        store: Arc<dyn AuditStore>,
        collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            actions: DashMap::new(),
            bindings: DashMap::new(),
            slots: DashMap::new(),
            ledger: Mutex::new(VecDeque::new()),
            settings,
            store,
            collector,
        }
    }

    /// Register a named action (replaces an existing one with the same name)
    pub fn register(&self, name: impl Into<String>, action: Arc<dyn RecoveryAction>) {
        let name = name.into();
        info!(action = %name, kind = action.kind(), "Registered recovery action");
        self.actions.insert(name, action);
    }

    /// Bind a component to an action; `base` overrides the default cooldown base
    pub fn bind(&self, component: impl Into<String>, action: impl Into<String>, base: Option<Duration>) {
        let base = base.unwrap_or(self.settings.backoff.default_base);
        self.bindings.insert(
            component.into(),
            Binding {
                action: action.into(),
                base,
            },
        );
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.iter().map(|a| a.key().clone()).collect();
        names.sort();
        names
    }

    fn slot(&self, component: &str) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(component.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Run (or join, or throttle) the recovery bound to `component`
    pub async fn execute(self: &Arc<Self>, component: &str) -> RecoveryOutcome {
        let slot = self.slot(component);

        let shared = {
            let mut s = lock(&slot);
            if let Some(in_flight) = s.in_flight.clone() {
                in_flight
            } else {
                if let Some(next) = s.next_allowed {
                    let now = Instant::now();
                    if now < next {
                        let retry_in = next - now;
                        return RecoveryOutcome::Throttled {
                            retry_in_ms: u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                        };
                    }
                }

                let Some((action_name, base)) = self
                    .bindings
                    .get(component)
                    .map(|b| (b.action.clone(), b.base))
                else {
                    return RecoveryOutcome::NoAction;
                };
                let Some(action) = self.actions.get(&action_name).map(|a| a.value().clone()) else {
                    warn!(component, action = %action_name, "Bound recovery action is not registered");
                    return RecoveryOutcome::NoAction;
                };

                let this = Arc::clone(self);
                let epoch = s.epoch;
                let comp = component.to_string();
                let name = action_name.clone();
                let slot_for_task = slot.clone();
                let handle = tokio::spawn(async move {
                    this.run_attempt(comp, name, action, base, slot_for_task, epoch).await
                });

                let shared = async move {
                    match handle.await {
                        Ok(outcome) => outcome,
                        Err(e) => RecoveryOutcome::Failed {
                            action: action_name,
                            error: format!("recovery task aborted: {}", e),
                        },
                    }
                }
                .boxed()
                .shared();

                s.in_flight = Some(shared.clone());
                shared
            }
        };

        shared.await
    }

    async fn run_attempt(
        self: Arc<Self>,
        component: String,
        action_name: String,
        action: Arc<dyn RecoveryAction>,
        base: Duration,
        slot: Arc<Mutex<Slot>>,
        epoch: u64,
    ) -> RecoveryOutcome {
        info!(component = %component, action = %action_name, "🔧 Running recovery action");
        self.collector.incr(counters::RECOVERY_ATTEMPTS);

        let started_at = Utc::now();
        let start = Instant::now();

        let mut task = tokio::spawn({
            let action = action.clone();
            let component = component.clone();
            async move { action.run(&component).await }
        });

        let result = match tokio::time::timeout(self.settings.timeout, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join)) => Err(format!("action panicked: {}", join)),
            Err(_) => {
                task.abort();
                Err(format!("timeout after {}s", self.settings.timeout.as_secs()))
            }
        };
        let elapsed = start.elapsed();

        let attempt = RecoveryAttempt {
            action: action_name.clone(),
            component: component.clone(),
            started_at,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            success: result.is_ok(),
            error: result.as_ref().err().cloned(),
        };
        self.record(attempt);

        let outcome = match result {
            Ok(()) => {
                info!(component = %component, action = %action_name, duration_ms = elapsed.as_millis() as u64, "✅ Recovery action succeeded");
                RecoveryOutcome::Succeeded { action: action_name }
            }
            Err(error) => {
                self.collector.incr(counters::RECOVERY_FAILURES);
                error!(component = %component, action = %action_name, error = %error, "Recovery action failed");
                RecoveryOutcome::Failed {
                    action: action_name,
                    error,
                }
            }
        };

        // Clear the slot and start the cooldown from completion
        let mut s = lock(&slot);
        s.in_flight = None;
        if s.epoch != epoch {
            drop(s);
            return outcome;
        }
        if outcome.is_success() {
            s.consecutive_failures = 0;
        } else {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        }
        let cooldown = self.settings.backoff.cooldown(base, s.consecutive_failures);
        s.next_allowed = Some(Instant::now() + cooldown);
        drop(s);

        outcome
    }

    fn record(&self, attempt: RecoveryAttempt) {
        if let Err(e) = self.store.record_attempt(&attempt) {
            warn!(backend = self.store.backend_name(), error = %e, "Failed to persist recovery attempt");
        }
        let mut ledger = lock(&self.ledger);
        ledger.push_back(attempt);
        while ledger.len() > self.settings.ledger_limit.max(1) {
            ledger.pop_front();
        }
    }

    /// Recent attempts, most recent first
    pub fn attempts(&self, limit: usize) -> Vec<RecoveryAttempt> {
        lock(&self.ledger).iter().rev().take(limit).cloned().collect()
    }

    /// Consecutive failed attempts for a component
    pub fn consecutive_failures(&self, component: &str) -> u32 {
        let Some(slot) = self.slots.get(component).map(|s| s.value().clone()) else {
            return 0;
        };
        let failures = lock(&slot).consecutive_failures;
        failures
    }

    /// Forget the backoff history of `component` once it is healthy again.
    ///
    /// An attempt still in flight keeps running and joiners still share it.
    pub fn reset(&self, component: &str) {
        let Some(slot) = self.slots.get(component).map(|s| s.value().clone()) else {
            return;
        };
        let mut s = lock(&slot);
        s.consecutive_failures = 0;
        s.next_allowed = None;
        s.epoch = s.epoch.wrapping_add(1);
    }

    pub fn is_in_flight(&self, component: &str) -> bool {
        let Some(slot) = self.slots.get(component).map(|s| s.value().clone()) else {
            return false;
        };
        let in_flight = lock(&slot).in_flight.is_some();
        in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor(base: Duration) -> Arc<RecoveryExecutor> {
        let settings = ExecutorSettings {
            backoff: BackoffPolicy {
                default_base: base,
                cap: Duration::from_secs(60),
                max_exponent: 6,
            },
            timeout: Duration::from_secs(5),
            ledger_limit: 100,
        };
        Arc::new(RecoveryExecutor::new(
            settings,
            Arc::new(InMemoryStore::new()),
            Arc::new(MetricsCollector::new()),
        ))
    }

    #[test]
    fn test_cooldown_doubles_and_caps() {
        let policy = BackoffPolicy {
            default_base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
            max_exponent: 6,
        };
        let base = Duration::from_secs(1);
        assert_eq!(policy.cooldown(base, 0), Duration::from_secs(1));
        assert_eq!(policy.cooldown(base, 1), Duration::from_secs(1));
        assert_eq!(policy.cooldown(base, 2), Duration::from_secs(2));
        assert_eq!(policy.cooldown(base, 3), Duration::from_secs(4));
        assert_eq!(policy.cooldown(base, 5), Duration::from_secs(10));
        assert_eq!(policy.cooldown(base, 40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unbound_component_has_no_action() {
        let exec = executor(Duration::from_secs(1));
        assert_eq!(exec.execute("nothing").await, RecoveryOutcome::NoAction);

        exec.bind("db", "missing", None);
        assert_eq!(exec.execute("db").await, RecoveryOutcome::NoAction);
        assert!(exec.attempts(10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_logged_and_throttled() {
        let exec = executor(Duration::from_secs(1));
        exec.register(
            "restart",
            Arc::new(FnAction::new(|_| {
                async { Err(ActionError::Failed("still down".to_string())) }.boxed()
            })),
        );
        exec.bind("db", "restart", None);

        let outcome = exec.execute("db").await;
        assert!(matches!(outcome, RecoveryOutcome::Failed { .. }));
        assert_eq!(exec.consecutive_failures("db"), 1);

        assert!(matches!(exec.execute("db").await, RecoveryOutcome::Throttled { .. }));

        let attempts = exec.attempts(10);
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].error.as_deref(), Some("still down"));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(matches!(exec.execute("db").await, RecoveryOutcome::Failed { .. }));
        assert_eq!(exec.consecutive_failures("db"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_cooldown() {
        let exec = executor(Duration::from_secs(30));
        exec.register(
            "restart",
            Arc::new(FnAction::new(|_| {
                async { Err(ActionError::Failed("still down".to_string())) }.boxed()
            })),
        );
        exec.bind("db", "restart", None);

        assert!(matches!(exec.execute("db").await, RecoveryOutcome::Failed { .. }));
        assert!(matches!(exec.execute("db").await, RecoveryOutcome::Throttled { .. }));

        exec.reset("db");
        assert_eq!(exec.consecutive_failures("db"), 0);
        assert!(matches!(exec.execute("db").await, RecoveryOutcome::Failed { .. }));
        assert_eq!(exec.consecutive_failures("db"), 1);
        assert_eq!(exec.attempts(10).len(), 2);

        exec.reset("unknown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_finishing_after_reset_keeps_clean_slate() {
        let exec = executor(Duration::from_secs(30));
        exec.register(
            "restart",
            Arc::new(FnAction::new(|_| {
                async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Err(ActionError::Failed("still down".to_string()))
                }
                .boxed()
            })),
        );
        exec.bind("db", "restart", None);

        let pending = tokio::spawn({
            let exec = exec.clone();
            async move { exec.execute("db").await }
        });
        for _ in 0..10 {
            if exec.is_in_flight("db") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(exec.is_in_flight("db"));

        exec.reset("db");
        assert!(exec.is_in_flight("db"));
        assert!(matches!(pending.await.unwrap(), RecoveryOutcome::Failed { .. }));

        assert_eq!(exec.consecutive_failures("db"), 0);
        assert!(matches!(exec.execute("db").await, RecoveryOutcome::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_run() {
        let exec = executor(Duration::from_secs(1));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        exec.register(
            "restart",
            Arc::new(FnAction::new(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                }
                .boxed()
            })),
        );
        exec.bind("db", "restart", None);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let exec = exec.clone();
                tokio::spawn(async move { exec.execute("db").await })
            })
            .collect();

        for h in handles {
            assert!(h.await.unwrap().is_success());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(exec.attempts(10).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_timeout_is_failure() {
        let settings = ExecutorSettings {
            timeout: Duration::from_secs(1),
            ..ExecutorSettings::default()
        };
        let exec = Arc::new(RecoveryExecutor::new(
            settings,
            Arc::new(InMemoryStore::new()),
            Arc::new(MetricsCollector::new()),
        ));
        exec.register(
            "hang",
            Arc::new(FnAction::new(|_| {
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                .boxed()
            })),
        );
        exec.bind("svc", "hang", None);

        match exec.execute("svc").await {
            RecoveryOutcome::Failed { error, .. } => assert!(error.contains("timeout")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!exec.is_in_flight("svc"));
    }

    #[tokio::test]
    async fn test_panicking_action_is_failure() {
        let exec = executor(Duration::from_millis(10));
        exec.register(
            "boom",
            Arc::new(FnAction::new(|_| {
                async {
                    if true {
                        panic!("action exploded");
                    }
                    Ok(())
                }
                .boxed()
            })),
        );
        exec.bind("svc", "boom", None);

        assert!(matches!(exec.execute("svc").await, RecoveryOutcome::Failed { .. }));
        assert_eq!(exec.consecutive_failures("svc"), 1);
    }
}
