//! Health checks and the check registry
//!
//! A `HealthCheck` pairs a `Probe` with its schedule (interval, timeout),
//! its failure threshold and an optional recovery binding. Checks are
//! immutable once registered; the registry only ever adds.

mod probes;

pub use probes::{CommandProbe, CpuProbe, DiskProbe, FnProbe, HttpProbe, MemoryProbe, TcpProbe};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::collector::MetricsCollector;
use crate::config::{defaults, CheckConfig, ProbeKind};
use crate::types::Severity;

// ============================================================================
// Probe
// ============================================================================

/// Result of one probe invocation. A failing probe is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy { detail: String },
    Unhealthy { detail: String },
}

impl ProbeOutcome {
    pub fn healthy(detail: impl Into<String>) -> Self {
        ProbeOutcome::Healthy { detail: detail.into() }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        ProbeOutcome::Unhealthy { detail: detail.into() }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy { .. })
    }

    pub fn detail(&self) -> &str {
        match self {
            ProbeOutcome::Healthy { detail } | ProbeOutcome::Unhealthy { detail } => detail,
        }
    }
}

/// Trait for component probes
///
/// The scheduler runs `probe()` in its own task under the check's timeout,
/// so implementations may block on I/O freely; they must not assume they
/// run to completion.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Short kind label ("http", "tcp", ...)
    fn kind(&self) -> &'static str;

    async fn probe(&self) -> ProbeOutcome;
}

// ============================================================================
// HealthCheck
// ============================================================================

/// A configured check
#[derive(Clone)]
pub struct HealthCheck {
    pub name: String,
    pub probe: Arc<dyn Probe>,
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub recovery: Option<String>,
    pub alert_on_failure: bool,
    pub severity: Severity,
    pub metadata: BTreeMap<String, String>,
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("kind", &self.probe.kind())
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery", &self.recovery)
            .finish()
    }
}

impl HealthCheck {
    /// Check with default schedule and threshold
    pub fn new(name: impl Into<String>, probe: Arc<dyn Probe>) -> Self {
        Self {
            name: name.into(),
            probe,
            interval: Duration::from_secs(defaults::CHECK_INTERVAL_SECS),
            timeout: Duration::from_secs(defaults::CHECK_TIMEOUT_SECS),
            failure_threshold: defaults::FAILURE_THRESHOLD,
            recovery: None,
            alert_on_failure: true,
            severity: Severity::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery(mut self, action: impl Into<String>) -> Self {
        self.recovery = Some(action.into());
        self
    }

    pub fn with_alerting(mut self, alert_on_failure: bool) -> Self {
        self.alert_on_failure = alert_on_failure;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a check and its probe from a `[[checks]]` entry
    pub fn from_config(config: &CheckConfig, collector: &Arc<MetricsCollector>) -> Self {
        let probe: Arc<dyn Probe> = match &config.kind {
            ProbeKind::Http { url, accept_degraded } => Arc::new(
                HttpProbe::new(collector.clone(), url.clone(), config.timeout())
                    .accept_degraded(*accept_degraded),
            ),
            ProbeKind::Tcp { addr } => Arc::new(TcpProbe::new(addr.clone())),
            ProbeKind::Cpu { max_percent } => Arc::new(CpuProbe::new(collector.clone(), *max_percent)),
            ProbeKind::Memory { max_percent } => {
                Arc::new(MemoryProbe::new(collector.clone(), *max_percent))
            }
            ProbeKind::Disk { path, min_free_mb } => Arc::new(DiskProbe::new(path.clone(), *min_free_mb)),
            ProbeKind::Command { program, args } => {
                Arc::new(CommandProbe::new(program.clone(), args.clone()))
            }
        };

        Self {
            name: config.name.clone(),
            probe,
            interval: config.interval(),
            timeout: config.timeout(),
            failure_threshold: config.failure_threshold,
            recovery: config.recovery.clone(),
            alert_on_failure: config.alert_on_failure,
            severity: config.severity,
            metadata: config.metadata.clone(),
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::Invalid {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold must be >= 1"));
        }
        if self.interval.is_zero() {
            return Err(invalid("interval must be > 0"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be > 0"));
        }
        Ok(())
    }

    /// Serializable description for the API
    pub fn info(&self) -> CheckInfo {
        CheckInfo {
            name: self.name.clone(),
            kind: self.probe.kind().to_string(),
            interval_secs: self.interval.as_secs_f64(),
            timeout_secs: self.timeout.as_secs_f64(),
            failure_threshold: self.failure_threshold,
            recovery: self.recovery.clone(),
            alert_on_failure: self.alert_on_failure,
            severity: self.severity,
            metadata: self.metadata.clone(),
        }
    }
}

/// Serializable view of a `HealthCheck`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInfo {
    pub name: String,
    pub kind: String,
    pub interval_secs: f64,
    pub timeout_secs: f64,
    pub failure_threshold: u32,
    pub recovery: Option<String>,
    pub alert_on_failure: bool,
    pub severity: Severity,
    pub metadata: BTreeMap<String, String>,
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("check '{0}' is already registered")]
    Duplicate(String),
    #[error("check '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

/// Registered checks, keyed by name
#[derive(Default)]
pub struct HealthCheckRegistry {
    checks: RwLock<BTreeMap<String, Arc<HealthCheck>>>,
}

impl HealthCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check; names are unique
    pub fn register(&self, check: HealthCheck) -> Result<Arc<HealthCheck>, RegistryError> {
        check.validate()?;

        let mut checks = match self.checks.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("Check registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if checks.contains_key(&check.name) {
            return Err(RegistryError::Duplicate(check.name));
        }
        let check = Arc::new(check);
        checks.insert(check.name.clone(), check.clone());
        Ok(check)
    }

    pub fn get(&self, name: &str) -> Option<Arc<HealthCheck>> {
        self.read().get(name).cloned()
    }

    /// All checks ordered by name
    pub fn list(&self) -> Vec<Arc<HealthCheck>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<HealthCheck>>> {
        match self.checks.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("Check registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
