//! Engine: owns every component of one health-check instance
//!
//! There are no process-wide singletons: each `Engine` value carries its
//! own registry, tracker, executor, alert manager, collector, detector and
//! scheduler, so tests can run many isolated engines side by side.
//!
//! Control flow:
//! ```text
//! Scheduler ─probe─▶ handle_result ─▶ FailureTracker
//!                                   ├─▶ AlertManager (open / resolve)
//!                                   └─▶ RecoveryExecutor (spawned)
//! Sampler ─▶ MetricsCollector ─▶ AnomalyDetector ─▶ preventive actions
//! StatusAggregator ◀── reads tracker, alerts, collector, detector
//! ```

mod scheduler;

pub use scheduler::{probe_once, Scheduler};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alerts::{notifiers_from_config, AlertManager, Notification, NotificationDispatcher, Notifier};
use crate::anomaly::AnomalyDetector;
use crate::checks::{CheckInfo, HealthCheck, HealthCheckRegistry, RegistryError};
use crate::collector::{counters, MetricsCollector};
use crate::config::{
    AnomalyConfig, CheckConfig, ConfigError, EngineSettings, PreventiveConfig, VigilConfig,
};
use crate::recovery::{
    action_from_config, BackoffPolicy, ExecutorSettings, RecoveryAction, RecoveryExecutor,
};
use crate::status::{StatusAggregator, StatusSnapshot};
use crate::storage::{open_store, AuditStore, InMemoryStore};
use crate::tracker::{FailureTracker, Transition};
use crate::types::{Alert, CheckResult, Prediction, RecoveryAttempt, RecoveryOutcome};

/// Executor key for a preventive binding
pub fn preventive_component(metric: &str) -> String {
    format!("preventive:{}", metric)
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("check '{check}' is invalid: {}", .errors.join("; "))]
    InvalidCheck { check: String, errors: Vec<String> },
    #[error("check '{check}' references unknown recovery action '{action}'")]
    UnknownAction { check: String, action: String },
}

/// What one probe result did
#[derive(Debug)]
pub struct Reaction {
    pub transition: Transition,
    /// Alert opened by this result
    pub opened_alert: Option<String>,
    /// Alert resolved by this result
    pub resolved_alert: Option<String>,
    /// Recovery started (or joined) by this result
    pub recovery: Option<JoinHandle<RecoveryOutcome>>,
}

/// Construction inputs for `Engine::new`
pub struct EngineOptions {
    pub settings: EngineSettings,
    pub anomaly: AnomalyConfig,
    pub store: Arc<dyn AuditStore>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
    pub collector: Arc<MetricsCollector>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            settings: EngineSettings::default(),
            anomaly: AnomalyConfig::default(),
            store: Arc::new(InMemoryStore::new()),
            notifiers: Vec::new(),
            collector: Arc::new(MetricsCollector::new()),
        }
    }
}

type PendingDispatch = (mpsc::Receiver<Notification>, Vec<Arc<dyn Notifier>>);

pub struct Engine {
    settings: EngineSettings,
    registry: HealthCheckRegistry,
    tracker: Arc<FailureTracker>,
    executor: Arc<RecoveryExecutor>,
    alerts: Arc<AlertManager>,
    collector: Arc<MetricsCollector>,
    anomaly: Arc<AnomalyDetector>,
    status: StatusAggregator,
    store: Arc<dyn AuditStore>,
    preventive: Mutex<Vec<PreventiveConfig>>,
    scheduler: Scheduler,
    dispatch: Mutex<Option<PendingDispatch>>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Arc<Self> {
        let EngineOptions {
            settings,
            anomaly,
            store,
            notifiers,
            collector,
        } = options;

        let (notify_tx, dispatch) = if notifiers.is_empty() {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel(settings.notification_queue_size.max(1));
            (Some(tx), Some((rx, notifiers)))
        };

        let tracker = Arc::new(FailureTracker::new());
        let alerts = Arc::new(AlertManager::new(
            settings.alert_history_limit,
            notify_tx,
            store.clone(),
            collector.clone(),
        ));
        let executor = Arc::new(RecoveryExecutor::new(
            ExecutorSettings {
                backoff: BackoffPolicy {
                    default_base: Duration::from_secs(
                        settings
                            .recovery_backoff_base_secs
                            .unwrap_or(crate::config::defaults::CHECK_INTERVAL_SECS),
                    ),
                    cap: settings.backoff_cap(),
                    max_exponent: crate::config::defaults::RECOVERY_MAX_BACKOFF_EXPONENT,
                },
                timeout: settings.recovery_timeout(),
                ledger_limit: settings.attempt_history_limit,
            },
            store.clone(),
            collector.clone(),
        ));
        let anomaly = Arc::new(AnomalyDetector::new(&anomaly, settings.sample_interval()));
        let status = StatusAggregator::new(
            tracker.clone(),
            alerts.clone(),
            collector.clone(),
            anomaly.clone(),
            settings.error_rate_discount,
        );

        Arc::new(Self {
            settings,
            registry: HealthCheckRegistry::new(),
            tracker,
            executor,
            alerts,
            collector,
            anomaly,
            status,
            store,
            preventive: Mutex::new(Vec::new()),
            scheduler: Scheduler::new(),
            dispatch: Mutex::new(dispatch),
        })
    }

    /// Build an engine with every check, action and preventive binding from config
    pub fn from_config(config: &VigilConfig) -> Result<Arc<Self>, EngineError> {
        config.validate()?;

        let collector = Arc::new(MetricsCollector::with_system_gauges());
        let notifiers = notifiers_from_config(&config.notifications, collector.http_client());
        let store = open_store(config.storage.path.as_deref());
        info!(backend = store.backend_name(), "Audit store ready");

        let engine = Self::new(EngineOptions {
            settings: config.engine.clone(),
            anomaly: config.anomaly.clone(),
            store,
            notifiers,
            collector,
        });

        for action in &config.actions {
            engine.register_action(
                action.name.clone(),
                action_from_config(action, engine.collector.http_client()),
            );
        }
        for check in &config.checks {
            engine.register_check_config(check)?;
        }
        for p in &config.preventive {
            engine.bind_preventive(p.clone());
        }

        info!(
            checks = engine.registry.len(),
            actions = config.actions.len(),
            preventive = config.preventive.len(),
            "Engine configured"
        );
        Ok(engine)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn register_action(&self, name: impl Into<String>, action: Arc<dyn RecoveryAction>) {
        self.executor.register(name, action);
    }

    /// Register a check; starts probing at once if the engine is running
    pub fn register_check(self: &Arc<Self>, check: HealthCheck) -> Result<CheckInfo, EngineError> {
        if let Some(ref action) = check.recovery {
            if !self.executor.has_action(action) {
                return Err(EngineError::UnknownAction {
                    check: check.name.clone(),
                    action: action.clone(),
                });
            }
        }

        let check = self.registry.register(check)?;
        self.tracker.register(&check.name, check.failure_threshold);
        if let Some(ref action) = check.recovery {
            let base = match self.settings.recovery_backoff_base_secs {
                Some(secs) => Duration::from_secs(secs),
                None => check.interval,
            };
            self.executor.bind(check.name.clone(), action.clone(), Some(base));
        }

        info!(
            check = %check.name,
            kind = check.probe.kind(),
            threshold = check.failure_threshold,
            recovery = check.recovery.as_deref().unwrap_or("-"),
            "Check registered"
        );

        if self.scheduler.is_running() {
            self.scheduler.spawn_check(self.clone(), check.clone());
        }
        Ok(check.info())
    }

    /// Validate and register a `[[checks]]`-shaped entry
    pub fn register_check_config(self: &Arc<Self>, config: &CheckConfig) -> Result<CheckInfo, EngineError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(EngineError::InvalidCheck {
                check: config.name.clone(),
                errors,
            });
        }
        self.register_check(HealthCheck::from_config(config, &self.collector))
    }

    /// Run `config.action` when the detector flags `config.metric`
    pub fn bind_preventive(&self, config: PreventiveConfig) {
        self.executor
            .bind(preventive_component(&config.metric), config.action.clone(), None);
        info!(metric = %config.metric, action = %config.action, "Preventive action bound");
        match self.preventive.lock() {
            Ok(mut p) => p.push(config),
            Err(poisoned) => poisoned.into_inner().push(config),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn every check loop, the sampling loop and the notification
    /// dispatcher. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        if !self.scheduler.mark_started() {
            debug!("Engine already started");
            return;
        }

        for check in self.registry.list() {
            self.scheduler.spawn_check(self.clone(), check);
        }
        self.scheduler
            .spawn_sampler(self.clone(), self.settings.sample_interval());

        let pending = match self.dispatch.lock() {
            Ok(mut d) => d.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((rx, notifiers)) = pending {
            let dispatcher = NotificationDispatcher::new(
                rx,
                notifiers,
                Duration::from_secs(self.settings.notification_timeout_secs),
            );
            self.scheduler
                .spawn(dispatcher.run(self.scheduler.cancel_token()));
        }

        info!(checks = self.registry.len(), "🚀 Engine started");
    }

    /// Cancel all loops and wait for in-flight probes and recoveries.
    ///
    /// Returns false if the shutdown grace elapsed first.
    pub async fn stop(&self) -> bool {
        info!("Engine stopping");
        let drained = self.scheduler.shutdown(self.settings.shutdown_grace()).await;

        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(backend = self.store.backend_name(), error = %e, "Failed to flush audit store"),
            Err(e) => warn!(error = %e, "Audit store flush task failed"),
        }

        info!(drained, "Engine stopped");
        drained
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    // ========================================================================
    // Result Callback
    // ========================================================================

    /// Feed one probe result through the state machine and react to the
    /// transition. Must be called from within a tokio runtime.
    pub fn handle_result(self: &Arc<Self>, result: CheckResult) -> Reaction {
        self.collector.incr(counters::PROBES_TOTAL);
        if !result.healthy {
            self.collector.incr(counters::PROBES_FAILED);
        }

        let check = self.registry.get(&result.check);
        let transition = self.tracker.record(&result);
        let mut reaction = Reaction {
            transition,
            opened_alert: None,
            resolved_alert: None,
            recovery: None,
        };

        match transition {
            Transition::Unchanged => {}
            Transition::Degrading { failures } => {
                warn!(
                    check = %result.check,
                    failures,
                    threshold = check.as_ref().map(|c| c.failure_threshold).unwrap_or_default(),
                    detail = %result.detail,
                    "Check failing"
                );
            }
            Transition::ThresholdCrossed { failures, episode } => {
                error!(
                    check = %result.check,
                    failures,
                    episode,
                    detail = %result.detail,
                    "Failure threshold reached"
                );
                if let Some(ref check) = check {
                    if check.alert_on_failure {
                        let mut metadata = check.metadata.clone();
                        metadata.insert("consecutive_failures".to_string(), failures.to_string());
                        metadata.insert("last_detail".to_string(), result.detail.clone());
                        let message = format!(
                            "{} failed {} consecutive probes: {}",
                            check.name, failures, result.detail
                        );
                        reaction.opened_alert =
                            Some(self.alerts.open(&check.name, check.severity, message, metadata));
                    }
                    reaction.recovery = self.spawn_recovery(check);
                }
            }
            Transition::StillFailing { failures } => {
                warn!(check = %result.check, failures, detail = %result.detail, "Check still failing");
                if let Some(ref check) = check {
                    reaction.recovery = self.spawn_recovery(check);
                }
            }
            Transition::Recovered { from, .. } => {
                info!(check = %result.check, from = %from, "Check healthy again");
                reaction.resolved_alert = self.alerts.resolve(&result.check).map(|a| a.id);
                self.executor.reset(&result.check);
            }
        }

        reaction
    }

    fn spawn_recovery(self: &Arc<Self>, check: &HealthCheck) -> Option<JoinHandle<RecoveryOutcome>> {
        check.recovery.as_ref()?;
        let engine = self.clone();
        let component = check.name.clone();

        Some(self.scheduler.spawn(async move {
            let outcome = engine.executor.execute(&component).await;
            match &outcome {
                RecoveryOutcome::Succeeded { .. } => {
                    if engine.tracker.mark_recovering(&component) {
                        info!(check = %component, "Recovery done, awaiting confirming probe");
                    }
                }
                RecoveryOutcome::Failed { .. } => {}
                RecoveryOutcome::Throttled { retry_in_ms } => {
                    debug!(check = %component, retry_in_ms, "Recovery in cooldown");
                }
                RecoveryOutcome::NoAction => {
                    warn!(check = %component, "No recovery action bound");
                }
            }
            outcome
        }))
    }

    // ========================================================================
    // Sampling & Prediction
    // ========================================================================

    /// Sample every gauge, feed the detector and fire preventive actions.
    pub async fn sample_once(self: &Arc<Self>) -> Vec<Prediction> {
        let samples = self.collector.sample_all().await;
        for sample in &samples {
            self.anomaly.observe(sample);
        }

        let predictions = self.anomaly.predict();
        let bindings: Vec<PreventiveConfig> = match self.preventive.lock() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        for prediction in &predictions {
            for binding in bindings.iter().filter(|b| b.metric == prediction.metric) {
                if prediction.probability < binding.min_probability {
                    continue;
                }
                warn!(
                    metric = %prediction.metric,
                    probability = prediction.probability,
                    impact_secs = prediction.estimated_impact_secs,
                    action = %binding.action,
                    "⚠️ Trend risk, running preventive action"
                );
                let executor = self.executor.clone();
                let component = preventive_component(&binding.metric);
                self.scheduler.spawn(async move {
                    let outcome = executor.execute(&component).await;
                    debug!(component = %component, outcome = %outcome, "Preventive action finished");
                    outcome
                });
            }
        }

        predictions
    }

    /// Probe every check once, concurrently, and record the results.
    ///
    /// Used by `vigil check`; does not start the scheduler.
    pub async fn run_all_once(self: &Arc<Self>) -> Vec<CheckResult> {
        let checks = self.registry.list();
        let results = futures::future::join_all(checks.iter().map(|c| probe_once(c))).await;
        for result in &results {
            self.handle_result(result.clone());
        }
        results
    }

    // ========================================================================
    // Read Side
    // ========================================================================

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn checks(&self) -> Vec<CheckInfo> {
        self.registry.list().iter().map(|c| c.info()).collect()
    }

    pub fn check(&self, name: &str) -> Option<CheckInfo> {
        self.registry.get(name).map(|c| c.info())
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.list_active()
    }

    /// Alert events, most recent first; reads the audit store when it has them
    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        match self.store.recent_alerts(limit) {
            Ok(alerts) if !alerts.is_empty() => alerts,
            Ok(_) => self.alerts.history(limit),
            Err(e) => {
                warn!(error = %e, "Audit store read failed, serving in-memory history");
                self.alerts.history(limit)
            }
        }
    }

    /// Recovery attempts, most recent first
    pub fn recovery_attempts(&self, limit: usize) -> Vec<RecoveryAttempt> {
        match self.store.recent_attempts(limit) {
            Ok(attempts) if !attempts.is_empty() => attempts,
            Ok(_) => self.executor.attempts(limit),
            Err(e) => {
                warn!(error = %e, "Audit store read failed, serving in-memory ledger");
                self.executor.attempts(limit)
            }
        }
    }

    pub fn predictions(&self) -> Vec<Prediction> {
        self.anomaly.predict()
    }

    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.collector.counters_snapshot()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn executor(&self) -> &Arc<RecoveryExecutor> {
        &self.executor
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn anomaly(&self) -> &AnomalyDetector {
        &self.anomaly
    }
}
