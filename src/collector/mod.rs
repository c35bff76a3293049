//! Metrics Collector: on-demand resource samples and engine counters
//!
//! Gauges are read when sampled (CPU, memory, disk, HTTP reachability) or
//! set by callers (manual). Counters are monotonic `AtomicU64`s. The
//! collector keeps the last sample of every gauge so the status snapshot
//! can report resource levels without probing anything.

mod http;
mod system;

pub use http::{check_reachability, Reachability, ReachabilityReport};
pub use system::{disk_usage, DiskUsage, SystemReader};

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::MetricSample;

/// Engine counter names
pub mod counters {
    pub const PROBES_TOTAL: &str = "probes.total";
    pub const PROBES_FAILED: &str = "probes.failed";
    pub const RECOVERY_ATTEMPTS: &str = "recovery.attempts";
    pub const RECOVERY_FAILURES: &str = "recovery.failures";
    pub const ALERTS_OPENED: &str = "alerts.opened";
    pub const ALERTS_RESOLVED: &str = "alerts.resolved";
    pub const NOTIFICATIONS_DROPPED: &str = "notifications.dropped";

    pub const ALL: &[&str] = &[
        PROBES_TOTAL,
        PROBES_FAILED,
        RECOVERY_ATTEMPTS,
        RECOVERY_FAILURES,
        ALERTS_OPENED,
        ALERTS_RESOLVED,
        NOTIFICATIONS_DROPPED,
    ];
}

/// Built-in gauge names
pub mod gauges {
    pub const CPU: &str = "cpu.usage_percent";
    pub const MEMORY: &str = "memory.used_percent";
    pub const DISK: &str = "disk.used_percent";
}

/// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("metric {0} is not a manual gauge")]
    NotManual(String),
    #[error("metric {0} has not been set")]
    NoValue(String),
    #[error("metric unavailable: {0}")]
    Unavailable(String),
}

/// Where a gauge's value comes from
#[derive(Debug, Clone, PartialEq)]
pub enum GaugeSource {
    /// Global CPU usage percent
    Cpu,
    /// Used memory percent
    Memory,
    /// Used space percent of the filesystem holding `path`
    Disk { path: String },
    /// HTTP reachability class (0 healthy, 1 degraded, 2 critical)
    Reachability { url: String, timeout: Duration },
    /// Value pushed with `set_gauge`
    Manual,
}

struct Gauge {
    source: GaugeSource,
    labels: BTreeMap<String, String>,
    manual: Option<f64>,
}

struct Counter {
    labels: BTreeMap<String, String>,
    value: AtomicU64,
}

/// Metrics collector shared by probes, the engine and the sampling loop
pub struct MetricsCollector {
    system: Arc<SystemReader>,
    http: reqwest::Client,
    gauges: DashMap<String, Gauge>,
    counters: DashMap<String, Counter>,
    last: DashMap<String, MetricSample>,
}

impl MetricsCollector {
    /// Collector with the engine counters registered and no gauges
    pub fn new() -> Self {
        let collector = Self {
            system: Arc::new(SystemReader::new()),
            http: reqwest::Client::new(),
            gauges: DashMap::new(),
            counters: DashMap::new(),
            last: DashMap::new(),
        };
        for name in counters::ALL {
            collector.register_counter(name, BTreeMap::new());
        }
        collector
    }

    /// Collector with CPU, memory and root-disk gauges registered
    pub fn with_system_gauges() -> Self {
        let collector = Self::new();
        collector.register_gauge(gauges::CPU, BTreeMap::new(), GaugeSource::Cpu);
        collector.register_gauge(gauges::MEMORY, BTreeMap::new(), GaugeSource::Memory);
        let mut labels = BTreeMap::new();
        labels.insert("path".to_string(), "/".to_string());
        collector.register_gauge(
            gauges::DISK,
            labels,
            GaugeSource::Disk { path: "/".to_string() },
        );
        collector
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn system(&self) -> &SystemReader {
        &self.system
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register (or replace) a gauge
    pub fn register_gauge(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        source: GaugeSource,
    ) {
        debug!(metric = name, source = ?source, "Registered gauge");
        self.gauges.insert(
            name.to_string(),
            Gauge {
                source,
                labels,
                manual: None,
            },
        );
    }

    /// Register a counter; an existing counter keeps its value
    pub fn register_counter(&self, name: &str, labels: BTreeMap<String, String>) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| Counter {
                labels,
                value: AtomicU64::new(0),
            });
    }

    // ========================================================================
    // Counters
    // ========================================================================

    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    /// Increment a counter, registering it on first use
    pub fn incr_by(&self, name: &str, by: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.value.fetch_add(by, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| Counter {
                labels: BTreeMap::new(),
                value: AtomicU64::new(0),
            })
            .value
            .fetch_add(by, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.value.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn counters_snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|c| (c.key().clone(), c.value.load(Ordering::Relaxed)))
            .collect()
    }

    /// Counters as labelled samples
    pub fn counter_samples(&self) -> Vec<MetricSample> {
        self.counters
            .iter()
            .map(|c| {
                MetricSample::new(c.key().clone(), c.value.load(Ordering::Relaxed) as f64)
                    .with_labels(c.labels.clone())
            })
            .collect()
    }

    // ========================================================================
    // Gauges
    // ========================================================================

    /// Push a value into a manual gauge
    pub fn set_gauge(&self, name: &str, value: f64) -> Result<(), CollectorError> {
        let mut gauge = self
            .gauges
            .get_mut(name)
            .ok_or_else(|| CollectorError::UnknownMetric(name.to_string()))?;
        if gauge.source != GaugeSource::Manual {
            return Err(CollectorError::NotManual(name.to_string()));
        }
        gauge.manual = Some(value);
        Ok(())
    }

    /// Read a gauge now and remember the sample
    pub async fn sample(&self, name: &str) -> Result<f64, CollectorError> {
        // Clone out of the map so no shard lock is held across the await
        let (source, labels, manual) = {
            let gauge = self
                .gauges
                .get(name)
                .ok_or_else(|| CollectorError::UnknownMetric(name.to_string()))?;
            (gauge.source.clone(), gauge.labels.clone(), gauge.manual)
        };

        let value = match source {
            GaugeSource::Cpu => self.cpu_percent(),
            GaugeSource::Memory => self.memory_percent()?,
            GaugeSource::Disk { path } => disk_usage(&path)?.used_percent(),
            GaugeSource::Reachability { url, timeout } => {
                check_reachability(&self.http, &url, timeout).await.class.as_gauge()
            }
            GaugeSource::Manual => manual.ok_or_else(|| CollectorError::NoValue(name.to_string()))?,
        };

        self.last.insert(
            name.to_string(),
            MetricSample::new(name, value).with_labels(labels),
        );
        Ok(value)
    }

    /// Sample every gauge, skipping (and logging) the ones that fail
    pub async fn sample_all(&self) -> Vec<MetricSample> {
        let names: Vec<String> = self.gauges.iter().map(|g| g.key().clone()).collect();
        let mut samples = Vec::with_capacity(names.len());

        for name in names {
            match self.sample(&name).await {
                Ok(_) => {
                    if let Some(sample) = self.last.get(&name) {
                        samples.push(sample.clone());
                    }
                }
                Err(CollectorError::NoValue(_)) => {}
                Err(e) => warn!(metric = %name, error = %e, "Gauge sample failed"),
            }
        }

        samples
    }

    /// Last sampled value of every gauge
    pub fn last_gauges(&self) -> BTreeMap<String, f64> {
        self.last
            .iter()
            .map(|s| (s.key().clone(), s.value))
            .collect()
    }

    // ========================================================================
    // Direct Reads (used by probes)
    // ========================================================================

    pub fn cpu_percent(&self) -> f64 {
        self.system.cpu_usage_percent()
    }

    pub fn memory_percent(&self) -> Result<f64, CollectorError> {
        self.system.memory_used_percent()
    }

    pub async fn reachability(&self, url: &str, timeout: Duration) -> ReachabilityReport {
        check_reachability(&self.http, url, timeout).await
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_counters_preregistered() {
        let collector = MetricsCollector::new();
        let snapshot = collector.counters_snapshot();
        for name in counters::ALL {
            assert_eq!(snapshot.get(*name), Some(&0));
        }
    }

    #[test]
    fn test_incr_registers_unknown_counter() {
        let collector = MetricsCollector::new();
        collector.incr(counters::PROBES_TOTAL);
        collector.incr_by(counters::PROBES_TOTAL, 2);
        collector.incr("custom.events");
        assert_eq!(collector.counter(counters::PROBES_TOTAL), 3);
        assert_eq!(collector.counter("custom.events"), 1);
        assert_eq!(collector.counter("never.touched"), 0);
    }

    #[tokio::test]
    async fn test_manual_gauge() {
        let collector = MetricsCollector::new();
        collector.register_gauge("queue.depth", BTreeMap::new(), GaugeSource::Manual);

        assert!(matches!(
            collector.sample("queue.depth").await,
            Err(CollectorError::NoValue(_))
        ));

        collector.set_gauge("queue.depth", 42.0).unwrap();
        assert_eq!(collector.sample("queue.depth").await.unwrap(), 42.0);
        assert_eq!(collector.last_gauges().get("queue.depth"), Some(&42.0));
    }

    #[tokio::test]
    async fn test_unknown_gauge() {
        let collector = MetricsCollector::new();
        assert!(matches!(
            collector.sample("nope").await,
            Err(CollectorError::UnknownMetric(_))
        ));
        assert!(collector.set_gauge("nope", 1.0).is_err());
    }

    #[test]
    fn test_set_gauge_rejects_system_gauge() {
        let collector = MetricsCollector::with_system_gauges();
        assert!(matches!(
            collector.set_gauge(gauges::CPU, 5.0),
            Err(CollectorError::NotManual(_))
        ));
    }

    #[tokio::test]
    async fn test_sample_all_system_gauges() {
        let collector = MetricsCollector::with_system_gauges();
        let samples = collector.sample_all().await;
        assert!(samples.iter().any(|s| s.name == gauges::MEMORY));
        assert!(samples.iter().any(|s| s.name == gauges::DISK));
        assert!(collector.last_gauges().contains_key(gauges::CPU));
    }
}
