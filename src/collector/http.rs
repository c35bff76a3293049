//! HTTP reachability classification
//!
//! 2xx → Healthy, any other status below 500 → Degraded, 5xx, timeout or
//! connection error → Critical.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Reachability class of an HTTP endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Healthy,
    Degraded,
    Critical,
}

impl Reachability {
    /// Classify a response status code
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Reachability::Healthy,
            0..=499 => Reachability::Degraded,
            _ => Reachability::Critical,
        }
    }

    /// Gauge encoding: healthy 0, degraded 1, critical 2
    pub fn as_gauge(self) -> f64 {
        match self {
            Reachability::Healthy => 0.0,
            Reachability::Degraded => 1.0,
            Reachability::Critical => 2.0,
        }
    }
}

impl std::fmt::Display for Reachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reachability::Healthy => write!(f, "healthy"),
            Reachability::Degraded => write!(f, "degraded"),
            Reachability::Critical => write!(f, "critical"),
        }
    }
}

/// Outcome of one reachability request
#[derive(Debug, Clone)]
pub struct ReachabilityReport {
    pub class: Reachability,
    /// Response status, absent on timeout / connection failure
    pub status: Option<u16>,
    pub latency: Duration,
    pub detail: String,
}

/// GET `url` with a hard deadline and classify the result.
///
/// Never returns an error: unreachable endpoints are `Critical`.
pub async fn check_reachability(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> ReachabilityReport {
    let start = Instant::now();

    let result = tokio::time::timeout(timeout, client.get(url).send()).await;
    let latency = start.elapsed();

    let report = match result {
        Ok(Ok(resp)) => {
            let status = resp.status().as_u16();
            let class = Reachability::from_status(status);
            ReachabilityReport {
                class,
                status: Some(status),
                latency,
                detail: format!("HTTP {}", status),
            }
        }
        Ok(Err(e)) => ReachabilityReport {
            class: Reachability::Critical,
            status: None,
            latency,
            detail: if e.is_timeout() {
                "timeout".to_string()
            } else {
                format!("connection failed: {}", e)
            },
        },
        Err(_) => ReachabilityReport {
            class: Reachability::Critical,
            status: None,
            latency: timeout,
            detail: "timeout".to_string(),
        },
    };

    debug!(
        url,
        class = %report.class,
        latency_ms = report.latency.as_millis() as u64,
        "Reachability check complete"
    );

    report
}
