//! Metric types: MetricSample, Prediction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single point-in-time metric reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            labels: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// Trend-based risk flagged by the anomaly detector.
///
/// `probability` and `estimated_impact_secs` are heuristics meant to drive
/// preventive actions, not guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub metric: String,
    /// 0.0-1.0
    pub probability: f64,
    /// Seconds until the metric is expected to reach its configured limit
    pub estimated_impact_secs: Option<u64>,
    pub recent_avg: f64,
    pub baseline_avg: f64,
    /// recent_avg / baseline_avg
    pub growth_ratio: f64,
}
