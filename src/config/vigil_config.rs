//! Vigil Configuration - checks, actions and engine tuning as TOML values
//!
//! Every tunable that drives the engine is a field in this module. Each
//! struct implements `Default` with the values from `defaults`, so an empty
//! file (or no file at all) yields a working, check-less engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::types::Severity;

// ============================================================================
// Errors
// ============================================================================

/// Configuration loading / validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({0}): {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({0}): {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one engine instance.
///
/// Load with `VigilConfig::load()` which searches:
/// 1. `$VIGIL_CONFIG` env var
/// 2. `./vigil.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Scheduler / recovery / alerting tuning
    #[serde(default)]
    pub engine: EngineSettings,

    /// Trend detection parameters
    #[serde(default)]
    pub anomaly: AnomalyConfig,

    /// Optional audit persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// Notification transports (absent = disabled)
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Health checks registered at startup
    #[serde(default)]
    pub checks: Vec<CheckConfig>,

    /// Recovery actions checks can bind to
    #[serde(default)]
    pub actions: Vec<ActionConfig>,

    /// Prediction-driven preventive actions
    #[serde(default)]
    pub preventive: Vec<PreventiveConfig>,
}

impl VigilConfig {
    /// Load configuration using the standard search order:
    /// 1. `$VIGIL_CONFIG` environment variable
    /// 2. `./vigil.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// Environment overrides for notification transports are applied in
    /// every case.
    pub fn load() -> Self {
        let mut config = Self::load_file_or_default();
        config.apply_env_overrides();
        config
    }

    fn load_file_or_default() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var("VIGIL_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), checks = config.checks.len(), "Loaded config from VIGIL_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from VIGIL_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "VIGIL_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./vigil.toml
        let local = PathBuf::from("vigil.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(checks = config.checks.len(), "Loaded config from ./vigil.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./vigil.toml, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No vigil.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&contents, path)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, Path::new("<inline>"))
    }

    fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(origin.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-references and ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_semantics(self);
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Apply `VIGIL_*` environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (tests pass a map).
    ///
    /// Empty values are treated as unset.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = get("VIGIL_SERVER_ADDR") {
            self.server.addr = addr;
        }

        if let Some(url) = get("VIGIL_WEBHOOK_URL") {
            self.notifications.webhook = Some(WebhookConfig { url });
        }

        if let Some(host) = get("VIGIL_SMTP_HOST") {
            let smtp = self.notifications.smtp.get_or_insert_with(|| SmtpConfig {
                host: String::new(),
                port: defaults::SMTP_PORT,
                username: None,
                password: None,
                from: String::new(),
                to: Vec::new(),
                starttls: true,
            });
            smtp.host = host;
        }
        if let Some(smtp) = self.notifications.smtp.as_mut() {
            if let Some(port) = get("VIGIL_SMTP_PORT") {
                match port.trim().parse() {
                    Ok(p) => smtp.port = p,
                    Err(_) => warn!(value = %port, "Ignoring invalid VIGIL_SMTP_PORT"),
                }
            }
            if let Some(user) = get("VIGIL_SMTP_USERNAME") {
                smtp.username = Some(user);
            }
            if let Some(pass) = get("VIGIL_SMTP_PASSWORD") {
                smtp.password = Some(pass);
            }
            if let Some(from) = get("VIGIL_SMTP_FROM") {
                smtp.from = from;
            }
            if let Some(to) = get("VIGIL_SMTP_TO") {
                smtp.to = to
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the status endpoint
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Resource sampling cadence (seconds)
    pub sample_interval_secs: u64,
    /// Base recovery cooldown (seconds); `None` uses the check's interval
    pub recovery_backoff_base_secs: Option<u64>,
    /// Cooldown ceiling (seconds)
    pub recovery_backoff_cap_secs: u64,
    /// Deadline for one recovery action (seconds)
    pub recovery_timeout_secs: u64,
    pub alert_history_limit: usize,
    pub attempt_history_limit: usize,
    pub notification_queue_size: usize,
    pub notification_timeout_secs: u64,
    /// Weight (0-1) of the short-window error rate in the health score
    pub error_rate_discount: f64,
    /// `status` exits non-zero when the score is at or below this value
    pub status_threshold: f64,
    /// How long `stop()` waits for in-flight recovery actions (seconds)
    pub shutdown_grace_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_interval_secs: defaults::SAMPLE_INTERVAL_SECS,
            recovery_backoff_base_secs: None,
            recovery_backoff_cap_secs: defaults::RECOVERY_BACKOFF_CAP_SECS,
            recovery_timeout_secs: defaults::RECOVERY_TIMEOUT_SECS,
            alert_history_limit: defaults::ALERT_HISTORY_LIMIT,
            attempt_history_limit: defaults::ATTEMPT_HISTORY_LIMIT,
            notification_queue_size: defaults::NOTIFICATION_QUEUE_SIZE,
            notification_timeout_secs: defaults::NOTIFICATION_TIMEOUT_SECS,
            error_rate_discount: 0.0,
            status_threshold: defaults::STATUS_THRESHOLD,
            shutdown_grace_secs: defaults::SHUTDOWN_GRACE_SECS,
        }
    }
}

impl EngineSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.recovery_backoff_cap_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ============================================================================
// Anomaly Detection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Samples per sub-window
    pub window_size: usize,
    /// Recent/prior ratio that flags a risk
    pub growth_factor: f64,
    /// Predictions are skipped while the prior average is at or below this
    pub min_prior_average: f64,
    /// Per-metric critical limits used to estimate the impact window
    pub limits: BTreeMap<String, f64>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert("cpu.usage_percent".to_string(), defaults::CPU_MAX_PERCENT);
        limits.insert("memory.used_percent".to_string(), defaults::MEMORY_MAX_PERCENT);
        limits.insert("disk.used_percent".to_string(), 95.0);
        Self {
            window_size: defaults::ANOMALY_WINDOW_SIZE,
            growth_factor: defaults::ANOMALY_GROWTH_FACTOR,
            min_prior_average: 0.0,
            limits,
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled directory for the audit store; `None` keeps everything in memory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default = "default_true")]
    pub starttls: bool,
}

// Keeps the password out of logs.
impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from", &self.from)
            .field("to", &self.to)
            .field("starttls", &self.starttls)
            .finish()
    }
}

impl SmtpConfig {
    /// Host, sender and at least one recipient are present.
    pub fn is_complete(&self) -> bool {
        !self.host.trim().is_empty() && !self.from.trim().is_empty() && !self.to.is_empty()
    }
}

fn default_smtp_port() -> u16 {
    defaults::SMTP_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

// ============================================================================
// Checks
// ============================================================================

/// One `[[checks]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub name: String,

    /// Probe kind and its parameters
    #[serde(flatten)]
    pub kind: ProbeKind,

    #[serde(default = "default_interval", alias = "intervalSeconds")]
    pub interval_secs: u64,

    #[serde(default = "default_timeout", alias = "timeoutSeconds")]
    pub timeout_secs: u64,

    #[serde(default = "default_threshold", alias = "failureThreshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_true", alias = "alertOnFailure")]
    pub alert_on_failure: bool,

    /// Name of the `[[actions]]` entry run when the check starts failing
    #[serde(default)]
    pub recovery: Option<String>,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckConfig {
    pub fn new(name: impl Into<String>, kind: ProbeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            interval_secs: defaults::CHECK_INTERVAL_SECS,
            timeout_secs: defaults::CHECK_TIMEOUT_SECS,
            failure_threshold: defaults::FAILURE_THRESHOLD,
            alert_on_failure: true,
            recovery: None,
            severity: Severity::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Field-level checks that do not need the rest of the config.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let name = &self.name;
        if self.failure_threshold == 0 {
            errors.push(format!("checks.{name}: failure_threshold must be >= 1"));
        }
        if self.interval_secs == 0 {
            errors.push(format!("checks.{name}: interval_secs must be > 0"));
        }
        if self.timeout_secs == 0 {
            errors.push(format!("checks.{name}: timeout_secs must be > 0"));
        }
        match &self.kind {
            ProbeKind::Http { url, .. } if !(url.starts_with("http://") || url.starts_with("https://")) => {
                errors.push(format!("checks.{name}: url '{url}' must be http(s)"));
            }
            ProbeKind::Tcp { addr } if addr.trim().is_empty() => {
                errors.push(format!("checks.{name}: addr must not be empty"));
            }
            ProbeKind::Cpu { max_percent } | ProbeKind::Memory { max_percent }
                if !(0.0..=100.0).contains(max_percent) =>
            {
                errors.push(format!("checks.{name}: max_percent {max_percent:.1} must be within 0-100"));
            }
            ProbeKind::Command { program, .. } if program.trim().is_empty() => {
                errors.push(format!("checks.{name}: program must not be empty"));
            }
            _ => {}
        }
        errors
    }
}

/// Probe kinds available from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    /// HTTP GET; 2xx healthy, other <500 degraded, >=500 / error critical
    Http {
        url: String,
        /// Treat degraded (3xx/4xx) responses as healthy
        #[serde(default)]
        accept_degraded: bool,
    },
    /// TCP connect
    Tcp { addr: String },
    /// Global CPU usage below `max_percent`
    Cpu {
        #[serde(default = "default_cpu_max")]
        max_percent: f64,
    },
    /// Memory usage below `max_percent`
    Memory {
        #[serde(default = "default_memory_max")]
        max_percent: f64,
    },
    /// Free space on the filesystem holding `path` above `min_free_mb`
    Disk {
        #[serde(default = "default_disk_path")]
        path: String,
        #[serde(default = "default_disk_min_free")]
        min_free_mb: u64,
    },
    /// Command exiting with status 0
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_interval() -> u64 {
    defaults::CHECK_INTERVAL_SECS
}

fn default_timeout() -> u64 {
    defaults::CHECK_TIMEOUT_SECS
}

fn default_threshold() -> u32 {
    defaults::FAILURE_THRESHOLD
}

fn default_true() -> bool {
    true
}

fn default_cpu_max() -> f64 {
    defaults::CPU_MAX_PERCENT
}

fn default_memory_max() -> f64 {
    defaults::MEMORY_MAX_PERCENT
}

fn default_disk_path() -> String {
    "/".to_string()
}

fn default_disk_min_free() -> u64 {
    defaults::DISK_MIN_FREE_MB
}

// ============================================================================
// Actions
// ============================================================================

/// One `[[actions]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Run a command (process restart, service reload, ...)
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// `<runtime> restart <container>`
    ContainerRestart {
        container: String,
        #[serde(default = "default_container_runtime")]
        runtime: String,
    },
    /// POST to an external endpoint (redeploy hooks, orchestrators)
    Webhook { url: String },
    /// Remove everything inside a cache directory
    CacheFlush { dir: PathBuf },
    /// Remove files older than `max_age_secs` inside a directory
    DiskCleanup { dir: PathBuf, max_age_secs: u64 },
}

fn default_container_runtime() -> String {
    "docker".to_string()
}

// ============================================================================
// Preventive Actions
// ============================================================================

/// Run `action` when the detector predicts a risk on `metric`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreventiveConfig {
    pub metric: String,
    pub action: String,
    #[serde(default = "default_min_probability")]
    pub min_probability: f64,
}

fn default_min_probability() -> f64 {
    defaults::PREVENTIVE_MIN_PROBABILITY
}
