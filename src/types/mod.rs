//! Shared data structures for the health engine
//!
//! - Checks: CheckResult (one probe cycle), CheckState + FailureState (tracker)
//! - Alerts: Alert, Severity
//! - Recovery: RecoveryAttempt, RecoveryOutcome
//! - Metrics: MetricSample, Prediction

mod check;
mod alert;
mod recovery;
mod metric;

pub use check::*;
pub use alert::*;
pub use recovery::*;
pub use metric::*;
