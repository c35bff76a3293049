//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Server
// ============================================================================

/// Default bind address for the status endpoint.
pub const SERVER_ADDR: &str = "0.0.0.0:9090";

/// Default URL the `status` command queries.
pub const STATUS_URL: &str = "http://127.0.0.1:9090";

// ============================================================================
// Checks
// ============================================================================

/// Default probe interval (seconds).
pub const CHECK_INTERVAL_SECS: u64 = 30;

/// Default probe deadline (seconds).
pub const CHECK_TIMEOUT_SECS: u64 = 5;

/// Default consecutive failures before a check is Failing.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Default CPU usage ceiling for `cpu` checks (percent).
pub const CPU_MAX_PERCENT: f64 = 90.0;

/// Default memory usage ceiling for `memory` checks (percent).
pub const MEMORY_MAX_PERCENT: f64 = 90.0;

/// Default minimum free disk space for `disk` checks (MB).
pub const DISK_MIN_FREE_MB: u64 = 500;

// ============================================================================
// Engine
// ============================================================================

/// Interval between resource sampling cycles (seconds).
pub const SAMPLE_INTERVAL_SECS: u64 = 15;

/// Upper bound on the recovery backoff cooldown (seconds).
pub const RECOVERY_BACKOFF_CAP_SECS: u64 = 300;

/// Maximum backoff multiplier exponent for recovery retries.
///
/// `2^6 = 64× base`, further capped by `RECOVERY_BACKOFF_CAP_SECS`.
pub const RECOVERY_MAX_BACKOFF_EXPONENT: u32 = 6;

/// Time a single recovery action may run before it counts as failed (seconds).
pub const RECOVERY_TIMEOUT_SECS: u64 = 120;

/// Resolved/opened alerts kept in memory for post-mortem review.
pub const ALERT_HISTORY_LIMIT: usize = 500;

/// Recovery attempts kept in the in-memory ledger.
pub const ATTEMPT_HISTORY_LIMIT: usize = 500;

/// Capacity of the fire-and-forget notification queue.
pub const NOTIFICATION_QUEUE_SIZE: usize = 256;

/// Per-notifier delivery deadline (seconds).
pub const NOTIFICATION_TIMEOUT_SECS: u64 = 10;

/// Health score at or below which the `status` command exits non-zero.
pub const STATUS_THRESHOLD: f64 = 80.0;

/// Time `stop()` waits for in-flight recovery actions (seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

// ============================================================================
// Anomaly Detection
// ============================================================================

/// Samples per sub-window (recent and prior each hold this many).
pub const ANOMALY_WINDOW_SIZE: usize = 30;

/// `avg(recent) > avg(prior) * growth_factor` flags a risk.
pub const ANOMALY_GROWTH_FACTOR: f64 = 1.2;

/// Default minimum probability for a preventive action to fire.
pub const PREVENTIVE_MIN_PROBABILITY: f64 = 0.7;

// ============================================================================
// Notifications
// ============================================================================

/// Default SMTP submission port.
pub const SMTP_PORT: u16 = 587;
