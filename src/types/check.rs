//! Check types: CheckResult, CheckState, FailureState

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent probe outcomes kept per check for the error-rate window.
pub const ERROR_WINDOW_SIZE: usize = 20;

/// Result of a single probe cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the check that produced this result
    pub check: String,
    /// When the probe finished
    pub timestamp: DateTime<Utc>,
    /// Whether the probe reported the component healthy
    pub healthy: bool,
    /// Probe latency in milliseconds
    pub latency_ms: u64,
    /// Human-readable detail (error text, status code, measured value)
    pub detail: String,
}

impl CheckResult {
    pub fn healthy(check: impl Into<String>, latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            timestamp: Utc::now(),
            healthy: true,
            latency_ms: duration_ms(latency),
            detail: detail.into(),
        }
    }

    pub fn failed(check: impl Into<String>, latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            timestamp: Utc::now(),
            healthy: false,
            latency_ms: duration_ms(latency),
            detail: detail.into(),
        }
    }

    /// Failure produced when the probe misses its deadline.
    pub fn timed_out(check: impl Into<String>, timeout: Duration) -> Self {
        Self::failed(check, timeout, "timeout")
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Position of a check in the failure state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    /// Last probe succeeded
    Healthy,
    /// Failing, but below the failure threshold
    Degrading,
    /// Threshold reached; alert open and recovery triggered
    Failing,
    /// Recovery action completed, waiting for a probe to confirm
    Recovering,
}

impl CheckState {
    /// Checks in these states count towards the health score.
    pub fn is_operational(self) -> bool {
        matches!(self, CheckState::Healthy | CheckState::Degrading)
    }
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckState::Healthy => write!(f, "HEALTHY"),
            CheckState::Degrading => write!(f, "DEGRADING"),
            CheckState::Failing => write!(f, "FAILING"),
            CheckState::Recovering => write!(f, "RECOVERING"),
        }
    }
}

/// Per-check failure bookkeeping owned by the `FailureTracker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureState {
    pub state: CheckState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    /// Number of Failing episodes this check has entered
    pub episode: u64,
    pub last_result: Option<CheckResult>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub total_probes: u64,
    pub total_failures: u64,
    /// Most recent probe outcomes (true = healthy), oldest first
    #[serde(skip)]
    pub recent: VecDeque<bool>,
}

impl FailureState {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            state: CheckState::Healthy,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            episode: 0,
            last_result: None,
            last_success_at: None,
            last_failure_at: None,
            total_probes: 0,
            total_failures: 0,
            recent: VecDeque::with_capacity(ERROR_WINDOW_SIZE),
        }
    }

    /// Fraction of failed probes over the short window (0.0 when nothing probed yet).
    pub fn error_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failed = self.recent.iter().filter(|ok| !**ok).count();
        failed as f64 / self.recent.len() as f64
    }

    pub(crate) fn push_outcome(&mut self, healthy: bool) {
        if self.recent.len() == ERROR_WINDOW_SIZE {
            self.recent.pop_front();
        }
        self.recent.push_back(healthy);
    }
}
