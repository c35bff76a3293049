//! Alert types: Severity, Alert

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// An alert raised for a component.
///
/// The id is derived from the component name and the per-component episode
/// number, so reopening after a resolve yields a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub component: String,
    pub message: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn episode_id(component: &str, episode: u64) -> String {
        format!("{}#{}", component, episode)
    }

    /// Open duration, up to `resolved_at` or now.
    pub fn duration_secs(&self) -> i64 {
        let end = self.resolved_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_seconds().max(0)
    }
}
