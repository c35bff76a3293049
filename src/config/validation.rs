//! Config validation: unknown-key detection with Levenshtein suggestions
//! and semantic checks on checks, actions and engine tuning.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use super::{ActionKind, VigilConfig};

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, "; did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for VigilConfig.
///
/// Entries of `[[checks]]`, `[[actions]]` and `[[preventive]]` are walked
/// with a `[]` suffix on the array name, e.g. `checks[].url`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [server]
        "server",
        "server.addr",
        // [engine]
        "engine",
        "engine.sample_interval_secs",
        "engine.recovery_backoff_base_secs",
        "engine.recovery_backoff_cap_secs",
        "engine.recovery_timeout_secs",
        "engine.alert_history_limit",
        "engine.attempt_history_limit",
        "engine.notification_queue_size",
        "engine.notification_timeout_secs",
        "engine.error_rate_discount",
        "engine.status_threshold",
        "engine.shutdown_grace_secs",
        // [anomaly]
        "anomaly",
        "anomaly.window_size",
        "anomaly.growth_factor",
        "anomaly.min_prior_average",
        "anomaly.limits",
        // [storage]
        "storage",
        "storage.path",
        // [notifications]
        "notifications",
        "notifications.smtp",
        "notifications.smtp.host",
        "notifications.smtp.port",
        "notifications.smtp.username",
        "notifications.smtp.password",
        "notifications.smtp.from",
        "notifications.smtp.to",
        "notifications.smtp.starttls",
        "notifications.webhook",
        "notifications.webhook.url",
        // [[checks]]
        "checks",
        "checks[].name",
        "checks[].kind",
        "checks[].url",
        "checks[].accept_degraded",
        "checks[].addr",
        "checks[].max_percent",
        "checks[].path",
        "checks[].min_free_mb",
        "checks[].program",
        "checks[].args",
        "checks[].interval_secs",
        "checks[].intervalSeconds",
        "checks[].timeout_secs",
        "checks[].timeoutSeconds",
        "checks[].failure_threshold",
        "checks[].failureThreshold",
        "checks[].alert_on_failure",
        "checks[].alertOnFailure",
        "checks[].recovery",
        "checks[].severity",
        "checks[].metadata",
        // [[actions]]
        "actions",
        "actions[].name",
        "actions[].kind",
        "actions[].program",
        "actions[].args",
        "actions[].container",
        "actions[].runtime",
        "actions[].url",
        "actions[].dir",
        "actions[].max_age_secs",
        // [[preventive]]
        "preventive",
        "preventive[].metric",
        "preventive[].action",
        "preventive[].min_probability",
    ];
    keys.iter().copied().collect()
}

/// Tables whose children are free-form and must not be reported.
const FREE_FORM_TABLES: &[&str] = &["anomaly.limits", "checks[].metadata"];

/// Recursively walk a TOML value tree, collecting all dotted key paths.
///
/// Arrays of tables contribute their entries' keys under `name[]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if FREE_FORM_TABLES.contains(&path.as_str()) {
                continue;
            }
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            } else if let Some(items) = v.as_array() {
                let item_prefix = format!("{path}[]");
                for item in items.iter().filter(|i| i.is_table()) {
                    for key in walk_toml_keys(item, &item_prefix) {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Unknown keys never fail the load; they only warn.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| {
            let suggestion = suggest_correction(&key, &known);
            ValidationWarning {
                message: format!("Unknown config key '{key}'"),
                field: key,
                suggestion,
            }
        })
        .collect()
}

// ============================================================================
// Semantic Validation
// ============================================================================

/// Validate cross-references and ranges on a parsed config.
///
/// Returns (errors, warnings). Errors must prevent startup; warnings are
/// suspicious but not fatal.
pub fn validate_semantics(config: &VigilConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut check_names = HashSet::new();
    let action_names: HashSet<&str> = config.actions.iter().map(|a| a.name.as_str()).collect();

    if action_names.len() != config.actions.len() {
        errors.push("actions: duplicate action names".to_string());
    }

    for check in &config.checks {
        if check.name.trim().is_empty() {
            errors.push("checks: name must not be empty".to_string());
        }
        if !check_names.insert(check.name.as_str()) {
            errors.push(format!("checks.{}: duplicate check name", check.name));
        }
        errors.extend(check.validate());
        if let Some(ref action) = check.recovery {
            if !action_names.contains(action.as_str()) {
                errors.push(format!(
                    "checks.{}: recovery action '{}' is not defined in [[actions]]",
                    check.name, action
                ));
            }
        }
        if check.timeout_secs > check.interval_secs {
            warnings.push(ValidationWarning {
                field: format!("checks.{}.timeout_secs", check.name),
                message: format!(
                    "checks.{}: timeout ({}s) exceeds interval ({}s)",
                    check.name, check.timeout_secs, check.interval_secs
                ),
                suggestion: None,
            });
        }
    }

    for action in &config.actions {
        match &action.kind {
            ActionKind::Command { program, .. } if program.trim().is_empty() => {
                errors.push(format!("actions.{}: program must not be empty", action.name));
            }
            ActionKind::Webhook { url } if !url.starts_with("http") => {
                errors.push(format!("actions.{}: webhook url must be http(s)", action.name));
            }
            _ => {}
        }
    }

    for p in &config.preventive {
        if !action_names.contains(p.action.as_str()) {
            errors.push(format!(
                "preventive.{}: action '{}' is not defined in [[actions]]",
                p.metric, p.action
            ));
        }
        if !(0.0..=1.0).contains(&p.min_probability) {
            errors.push(format!(
                "preventive.{}: min_probability {:.2} must be within 0-1",
                p.metric, p.min_probability
            ));
        }
    }

    let a = &config.anomaly;
    if a.window_size == 0 {
        errors.push("anomaly.window_size must be > 0".to_string());
    }
    if a.min_prior_average < 0.0 {
        errors.push("anomaly.min_prior_average must be >= 0".to_string());
    }
    if a.growth_factor <= 1.0 {
        errors.push(format!(
            "anomaly.growth_factor = {:.3} must be > 1.0",
            a.growth_factor
        ));
    }

    let e = &config.engine;
    if e.sample_interval_secs == 0 {
        errors.push("engine.sample_interval_secs must be > 0".to_string());
    }
    if e.notification_queue_size == 0 {
        errors.push("engine.notification_queue_size must be > 0".to_string());
    }
    if !(0.0..=1.0).contains(&e.error_rate_discount) {
        errors.push(format!(
            "engine.error_rate_discount = {:.2} must be within 0-1",
            e.error_rate_discount
        ));
    }
    if !(0.0..=100.0).contains(&e.status_threshold) {
        errors.push(format!(
            "engine.status_threshold = {:.1} must be within 0-100",
            e.status_threshold
        ));
    }
    if e.recovery_backoff_base_secs == Some(0) {
        errors.push("engine.recovery_backoff_base_secs must be > 0".to_string());
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("engine.status_treshold", "engine.status_threshold"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_arrays_of_tables() {
        let toml: toml::Value = r#"
            [[checks]]
            name = "db"
            kind = "tcp"
            addr = "127.0.0.1:5432"

            [[checks]]
            name = "api"
            kind = "http"
            url = "http://localhost/health"
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"checks".to_string()));
        assert!(keys.contains(&"checks[].addr".to_string()));
        assert!(keys.contains(&"checks[].url".to_string()));
        assert_eq!(keys.iter().filter(|k| *k == "checks[].name").count(), 1);
    }

    #[test]
    fn test_free_form_tables_not_reported() {
        let raw = r#"
            [anomaly.limits]
            "cpu.usage_percent" = 95.0

            [[checks]]
            name = "db"
            kind = "tcp"
            addr = "127.0.0.1:5432"
            metadata = { owner = "dba" }
        "#;
        assert!(validate_unknown_keys(raw).is_empty());
    }

    #[test]
    fn test_unknown_key_suggestion() {
        let raw = r#"
            [engine]
            sample_interval_sec = 10
        "#;
        let warnings = validate_unknown_keys(raw);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("engine.sample_interval_secs")
        );
    }
}
