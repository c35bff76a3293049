//! Vigil: autonomous health checks, failure detection and remediation
//!
//! One [`Engine`] value owns a set of periodic health checks and everything
//! that reacts to them:
//!
//! - **Checks**: pluggable probes (HTTP, TCP, CPU, memory, disk, command)
//!   scheduled concurrently, each under its own timeout
//! - **Failure tracking**: per-check state machine with a consecutive
//!   failure threshold
//! - **Recovery**: bound actions run single-flight with exponential backoff
//! - **Alerting**: one open alert per component, webhook and SMTP delivery
//!   off the hot path
//! - **Prediction**: trend windows over sampled gauges drive preventive
//!   actions
//! - **Status**: health score and consolidated snapshot over HTTP

pub mod alerts;
pub mod anomaly;
pub mod api;
pub mod checks;
pub mod collector;
pub mod config;
pub mod engine;
pub mod recovery;
pub mod status;
pub mod storage;
pub mod tracker;
pub mod types;

pub use config::VigilConfig;
pub use engine::{Engine, EngineError, EngineOptions};
pub use status::{OverallStatus, StatusSnapshot};
pub use types::{Alert, CheckResult, CheckState, Prediction, RecoveryAttempt, RecoveryOutcome, Severity};
