//! Recovery types: RecoveryAttempt, RecoveryOutcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger entry written for every recovery action that actually ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub action: String,
    pub component: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// What a call to `RecoveryExecutor::execute` resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The action ran and reported success
    Succeeded { action: String },
    /// The action ran and failed (or timed out)
    Failed { action: String, error: String },
    /// Still inside the backoff cooldown from a previous attempt
    Throttled { retry_in_ms: u64 },
    /// No action is bound to the component
    NoAction,
}

impl RecoveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecoveryOutcome::Succeeded { .. })
    }

    /// Whether an action actually ran for this outcome.
    pub fn attempted(&self) -> bool {
        matches!(
            self,
            RecoveryOutcome::Succeeded { .. } | RecoveryOutcome::Failed { .. }
        )
    }
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryOutcome::Succeeded { action } => write!(f, "{} succeeded", action),
            RecoveryOutcome::Failed { action, error } => write!(f, "{} failed: {}", action, error),
            RecoveryOutcome::Throttled { retry_in_ms } => {
                write!(f, "throttled (retry in {}ms)", retry_in_ms)
            }
            RecoveryOutcome::NoAction => write!(f, "no action bound"),
        }
    }
}
