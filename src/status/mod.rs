//! Status Aggregator: health score and consolidated snapshot
//!
//! Read-only: it never probes and never mutates engine state. The score is
//! a pure function of the current `FailureState` snapshot, recomputed on
//! every call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::alerts::AlertManager;
use crate::anomaly::AnomalyDetector;
use crate::collector::MetricsCollector;
use crate::tracker::FailureTracker;
use crate::types::{Alert, CheckResult, CheckState, FailureState, Prediction};

/// Scores below this are labelled unhealthy
const UNHEALTHY_BELOW: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallStatus::Healthy => write!(f, "HEALTHY"),
            OverallStatus::Degraded => write!(f, "DEGRADED"),
            OverallStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Per-check view in the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckStatus {
    pub state: CheckState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub last_result: Option<CheckResult>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub total_probes: u64,
    pub total_failures: u64,
    /// Failed fraction of the last probes (short window)
    pub error_rate: f64,
}

impl From<&FailureState> for CheckStatus {
    fn from(fs: &FailureState) -> Self {
        Self {
            state: fs.state,
            consecutive_failures: fs.consecutive_failures,
            failure_threshold: fs.failure_threshold,
            last_result: fs.last_result.clone(),
            last_success_at: fs.last_success_at,
            last_failure_at: fs.last_failure_at,
            total_probes: fs.total_probes,
            total_failures: fs.total_failures,
            error_rate: fs.error_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    /// 0-100
    pub health_score: f64,
    pub overall: OverallStatus,
    pub total_checks: usize,
    pub operational_checks: usize,
    pub active_alerts: Vec<Alert>,
    pub checks: BTreeMap<String, CheckStatus>,
    pub resource_gauges: BTreeMap<String, f64>,
    pub counters: BTreeMap<String, u64>,
    pub predictions: Vec<Prediction>,
}

impl StatusSnapshot {
    /// Score strictly above `threshold`
    pub fn passes(&self, threshold: f64) -> bool {
        self.health_score > threshold
    }

    /// Human-readable report for the CLI
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "Health score: {:.1} ({})\nChecks: {}/{} operational\n",
            self.health_score, self.overall, self.operational_checks, self.total_checks
        );

        for (name, check) in &self.checks {
            let mark = if check.state.is_operational() { "✓" } else { "✗" };
            let detail = check
                .last_result
                .as_ref()
                .map(|r| r.detail.as_str())
                .unwrap_or("-");
            out.push_str(&format!(
                "  {} {:<24} {:<10} {}/{} failures  {}\n",
                mark,
                name,
                check.state.to_string(),
                check.consecutive_failures,
                check.failure_threshold,
                detail
            ));
        }

        if !self.active_alerts.is_empty() {
            out.push_str(&format!("Active alerts: {}\n", self.active_alerts.len()));
            for alert in &self.active_alerts {
                out.push_str(&format!(
                    "  [{}] {} {}\n",
                    alert.severity, alert.id, alert.message
                ));
            }
        }

        if !self.predictions.is_empty() {
            out.push_str("Trend risks:\n");
            for p in &self.predictions {
                let impact = match p.estimated_impact_secs {
                    Some(secs) => format!("limit in ~{}s", secs),
                    None => "no limit configured".to_string(),
                };
                out.push_str(&format!(
                    "  {} x{:.2} p={:.2} ({})\n",
                    p.metric, p.growth_ratio, p.probability, impact
                ));
            }
        }

        if !self.resource_gauges.is_empty() {
            let gauges: Vec<String> = self
                .resource_gauges
                .iter()
                .map(|(k, v)| format!("{}={:.1}", k, v))
                .collect();
            out.push_str(&format!("Resources: {}\n", gauges.join(" ")));
        }
        out
    }
}

/// `operational / total × 100`, discounted by `discount × mean error rate`.
///
/// 100 when there are no checks.
pub fn health_score<I>(states: I, discount: f64) -> f64
where
    I: IntoIterator<Item = (CheckState, f64)>,
{
    let mut total = 0usize;
    let mut operational = 0usize;
    let mut error_sum = 0.0;
    for (state, error_rate) in states {
        total += 1;
        if state.is_operational() {
            operational += 1;
        }
        error_sum += error_rate;
    }
    if total == 0 {
        return 100.0;
    }

    let base = operational as f64 / total as f64 * 100.0;
    let discount = discount.clamp(0.0, 1.0);
    let mean_error = error_sum / total as f64;
    (base * (1.0 - discount * mean_error)).clamp(0.0, 100.0)
}

fn overall_status(score: f64, all_operational: bool, active_alerts: usize) -> OverallStatus {
    if score < UNHEALTHY_BELOW {
        OverallStatus::Unhealthy
    } else if all_operational && active_alerts == 0 {
        OverallStatus::Healthy
    } else {
        OverallStatus::Degraded
    }
}

pub struct StatusAggregator {
    tracker: Arc<FailureTracker>,
    alerts: Arc<AlertManager>,
    collector: Arc<MetricsCollector>,
    anomaly: Arc<AnomalyDetector>,
    error_rate_discount: f64,
}

impl StatusAggregator {
    pub fn new(
        tracker: Arc<FailureTracker>,
        alerts: Arc<AlertManager>,
        collector: Arc<MetricsCollector>,
        anomaly: Arc<AnomalyDetector>,
        error_rate_discount: f64,
    ) -> Self {
        Self {
            tracker,
            alerts,
            collector,
            anomaly,
            error_rate_discount,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let states = self.tracker.snapshot();
        let checks: BTreeMap<String, CheckStatus> = states
            .iter()
            .map(|(name, fs)| (name.clone(), CheckStatus::from(fs)))
            .collect();

        let score = health_score(
            checks.values().map(|c| (c.state, c.error_rate)),
            self.error_rate_discount,
        );
        let operational = checks.values().filter(|c| c.state.is_operational()).count();
        let active_alerts = self.alerts.list_active();

        StatusSnapshot {
            timestamp: Utc::now(),
            health_score: score,
            overall: overall_status(score, operational == checks.len(), active_alerts.len()),
            total_checks: checks.len(),
            operational_checks: operational,
            active_alerts,
            checks,
            resource_gauges: self.collector.last_gauges(),
            counters: self.collector.counters_snapshot(),
            predictions: self.anomaly.predict(),
        }
    }
}
