//! Queue configuration validation.
//!
//! Validation runs on the raw configuration tree before anything is built,
//! so a malformed setup fails before a single connection is opened. The
//! result separates blocking errors from non-blocking warnings and
//! best-practice recommendations. Validating the same tree twice yields the
//! same report.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::drivers;

/// Allowed alert-rule conditions.
pub const ALERT_CONDITIONS: &[&str] =
    &["greater_than", "less_than", "equals", "not_equals"];

/// Allowed alert severities.
pub const ALERT_SEVERITIES: &[&str] = &["info", "warning", "error", "critical"];

/// Allowed worker backoff strategies.
pub const BACKOFF_STRATEGIES: &[&str] = &["linear", "exponential", "fixed"];

fn memory_limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+[KMG]?$").expect("valid regex"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validation Report
// ═══════════════════════════════════════════════════════════════════════════════

/// The outcome of validating a configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Blocking problems; any entry makes the configuration unusable.
    pub errors: Vec<String>,
    /// Non-blocking problems worth surfacing.
    pub warnings: Vec<String>,
    /// Best-practice suggestions.
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    /// Whether the configuration may be used.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn recommend(&mut self, message: impl Into<String>) {
        self.recommendations.push(message.into());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validator
// ═══════════════════════════════════════════════════════════════════════════════

/// Validates the full queue configuration tree: structure, per-connection
/// driver rules, cross-section rules, and worker settings.
#[derive(Debug, Clone, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `config` and produce a report. Pure: no state, no side
    /// effects, identical output for identical input.
    pub fn validate(&self, config: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();

        self.validate_structure(config, &mut report);
        self.validate_connections(config, &mut report);
        self.validate_failed_jobs(config, &mut report);
        self.validate_monitoring(config, &mut report);
        self.validate_workers(config, &mut report);
        self.validate_batching(config, &mut report);

        report
    }

    /// Required top-level keys and the default-connection reference.
    fn validate_structure(&self, config: &Value, report: &mut ValidationReport) {
        let Some(root) = config.as_object() else {
            report.error("configuration must be a table");
            return;
        };

        let default = match root.get("default") {
            Some(Value::String(name)) if !name.is_empty() => Some(name.clone()),
            Some(Value::String(_)) | None => {
                report.error("'default' connection name is required");
                None
            }
            Some(_) => {
                report.error("'default' must be a string");
                None
            }
        };

        match root.get("connections") {
            Some(Value::Object(connections)) if connections.is_empty() => {
                report.error("'connections' must not be empty");
            }
            Some(Value::Object(connections)) => {
                if let Some(default) = default {
                    if !connections.contains_key(&default) {
                        report.error(format!(
                            "default connection '{default}' is not declared in 'connections'"
                        ));
                    }
                }
            }
            Some(_) => report.error("'connections' must be a table"),
            None => report.error("'connections' section is required"),
        }
    }

    /// Per-connection rules, dispatched on the declared driver.
    fn validate_connections(&self, config: &Value, report: &mut ValidationReport) {
        let Some(connections) = config.get("connections").and_then(Value::as_object) else {
            return;
        };

        for (name, connection) in connections {
            let Some(connection_obj) = connection.as_object() else {
                report.error(format!("connection '{name}' must be a table"));
                continue;
            };

            let Some(driver) = connection_obj.get("driver").and_then(Value::as_str) else {
                report.error(format!("connection '{name}' is missing a 'driver'"));
                continue;
            };

            let driver_errors = match driver {
                "database" => drivers::database::validate_config(connection),
                "redis" => drivers::redis::validate_config(connection),
                "memory" | "sync" | "null" => Vec::new(),
                other => {
                    report.warn(format!(
                        "connection '{name}' uses driver '{other}' with no built-in validation rules"
                    ));
                    Vec::new()
                }
            };
            for error in driver_errors {
                report.error(format!("connection '{name}': {error}"));
            }

            if driver == "database" && !connection_obj.contains_key("pool_size") {
                report.recommend(format!(
                    "connection '{name}': enable connection pooling by setting 'pool_size'"
                ));
            }
        }
    }

    fn validate_failed_jobs(&self, config: &Value, report: &mut ValidationReport) {
        let Some(failed) = config.get("failed_jobs") else {
            return;
        };
        let Some(failed) = failed.as_object() else {
            report.error("'failed_jobs' must be a table");
            return;
        };

        for key in ["retention_days", "max_retries"] {
            if let Some(value) = failed.get(key) {
                match value.as_f64() {
                    Some(number) if number >= 0.0 => {}
                    Some(number) => report.error(format!(
                        "'failed_jobs.{key}' must be non-negative (got {number})"
                    )),
                    None => report.error(format!("'failed_jobs.{key}' must be a number")),
                }
            }
        }
    }

    fn validate_monitoring(&self, config: &Value, report: &mut ValidationReport) {
        let Some(monitoring) = config.get("monitoring") else {
            report.recommend("enable the 'monitoring' section to track worker health");
            return;
        };
        let Some(monitoring_obj) = monitoring.as_object() else {
            report.error("'monitoring' must be a table");
            return;
        };

        if let Some(retention) = monitoring_obj.get("metrics_retention_days") {
            match retention.as_i64() {
                Some(days) if days >= 1 => {}
                Some(days) => report.error(format!(
                    "'monitoring.metrics_retention_days' must be at least 1 (got {days})"
                )),
                None => report.error("'monitoring.metrics_retention_days' must be an integer"),
            }
        }

        let Some(alerts) = monitoring_obj.get("alerts") else {
            return;
        };
        let Some(alerts) = alerts.as_array() else {
            report.error("'monitoring.alerts' must be an array");
            return;
        };

        for (index, rule) in alerts.iter().enumerate() {
            let Some(rule_obj) = rule.as_object() else {
                report.error(format!("alert rule #{index} must be a table"));
                continue;
            };
            for key in ["name", "condition", "threshold"] {
                if !rule_obj.contains_key(key) {
                    report.error(format!("alert rule #{index} is missing '{key}'"));
                }
            }
            if let Some(condition) = rule_obj.get("condition").and_then(Value::as_str) {
                if !ALERT_CONDITIONS.contains(&condition) {
                    report.error(format!(
                        "alert rule #{index}: condition must be one of {} (got '{condition}')",
                        ALERT_CONDITIONS.join(", ")
                    ));
                }
            }
            if let Some(severity) = rule_obj.get("severity").and_then(Value::as_str) {
                if !ALERT_SEVERITIES.contains(&severity) {
                    report.error(format!(
                        "alert rule #{index}: severity must be one of {} (got '{severity}')",
                        ALERT_SEVERITIES.join(", ")
                    ));
                }
            }
        }
    }

    fn validate_workers(&self, config: &Value, report: &mut ValidationReport) {
        let Some(workers) = config.get("workers") else {
            return;
        };
        let Some(workers_obj) = workers.as_object() else {
            report.error("'workers' must be a table");
            return;
        };

        let min = workers_obj.get("min_workers").and_then(Value::as_i64);
        let max = workers_obj.get("max_workers").and_then(Value::as_i64);
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                report.error(format!(
                    "'workers.min_workers' ({min}) must not exceed 'workers.max_workers' ({max})"
                ));
            }
        }

        if let Some(limit) = workers_obj.get("memory_limit") {
            match limit.as_str() {
                Some(limit) if memory_limit_pattern().is_match(limit) => {}
                Some(limit) => report.error(format!(
                    "'workers.memory_limit' must match <digits>[K|M|G] (got '{limit}')"
                )),
                None => report.error("'workers.memory_limit' must be a string"),
            }
        }

        if let Some(backoff) = workers_obj.get("backoff") {
            match backoff.as_str() {
                Some(strategy) if BACKOFF_STRATEGIES.contains(&strategy) => {}
                Some(strategy) => report.error(format!(
                    "'workers.backoff' must be one of {} (got '{strategy}')",
                    BACKOFF_STRATEGIES.join(", ")
                )),
                None => report.error("'workers.backoff' must be a string"),
            }
        }

        match workers_obj.get("max_jobs").and_then(Value::as_i64) {
            Some(n) if n < 0 => report.error(format!("'workers.max_jobs' must be non-negative (got {n})")),
            Some(0) | None => {
                report.recommend(
                    "set 'workers.max_jobs' to periodically recycle long-lived worker processes",
                );
            }
            Some(_) => {}
        }
    }

    fn validate_batching(&self, config: &Value, report: &mut ValidationReport) {
        let Some(batching) = config.get("batching") else {
            return;
        };
        let Some(batching_obj) = batching.as_object() else {
            report.error("'batching' must be a table");
            return;
        };

        let enabled = batching_obj
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if enabled {
            match batching_obj.get("size").and_then(Value::as_i64) {
                Some(size) if size >= 1 => {}
                Some(size) => report.error(format!("'batching.size' must be at least 1 (got {size})")),
                None => report.error("'batching.size' is required when batching is enabled"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "default": "main",
            "connections": {
                "main": {"driver": "memory"}
            }
        })
    }

    #[test]
    fn test_minimal_config_is_valid() {
        let report = ConfigValidator::new().validate(&minimal());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_missing_top_level_keys() {
        let report = ConfigValidator::new().validate(&json!({}));
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.contains("'default'")));
        assert!(report.errors.iter().any(|e| e.contains("'connections'")));
    }

    #[test]
    fn test_default_must_reference_declared_connection() {
        let config = json!({
            "default": "missing",
            "connections": {"main": {"driver": "memory"}}
        });
        let report = ConfigValidator::new().validate(&config);
        assert!(report.errors.iter().any(|e| e.contains("missing")));
    }

    #[test]
    fn test_empty_connections_rejected() {
        let config = json!({"default": "main", "connections": {}});
        let report = ConfigValidator::new().validate(&config);
        assert!(report.errors.iter().any(|e| e.contains("must not be empty")));
    }

    #[test]
    fn test_connection_driver_dispatch() {
        let config = json!({
            "default": "db",
            "connections": {
                "db": {"driver": "database"},
                "cache": {"driver": "redis", "host": "localhost", "port": 70000}
            }
        });
        let report = ConfigValidator::new().validate(&config);
        assert!(report.errors.iter().any(|e| e.contains("connection 'db'") && e.contains("table")));
        assert!(report.errors.iter().any(|e| e.contains("connection 'cache'") && e.contains("65535")));
    }

    #[test]
    fn test_unknown_driver_is_a_warning_not_error() {
        let config = json!({
            "default": "x",
            "connections": {"x": {"driver": "kafka"}}
        });
        let report = ConfigValidator::new().validate(&config);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("kafka")));
    }

    #[test]
    fn test_failed_jobs_rules() {
        let mut config = minimal();
        config["failed_jobs"] = json!({"retention_days": -1, "max_retries": 3});
        let report = ConfigValidator::new().validate(&config);
        assert!(report.errors.iter().any(|e| e.contains("retention_days")));
    }

    #[test]
    fn test_monitoring_rules() {
        let mut config = minimal();
        config["monitoring"] = json!({
            "metrics_retention_days": 0,
            "alerts": [
                {"name": "depth", "condition": "sideways", "threshold": 100, "severity": "fatal"}
            ]
        });
        let report = ConfigValidator::new().validate(&config);
        assert!(report.errors.iter().any(|e| e.contains("metrics_retention_days")));
        assert!(report.errors.iter().any(|e| e.contains("condition")));
        assert!(report.errors.iter().any(|e| e.contains("severity")));
    }

    #[test]
    fn test_alert_rule_requires_fields() {
        let mut config = minimal();
        config["monitoring"] = json!({"alerts": [{"severity": "info"}]});
        let report = ConfigValidator::new().validate(&config);
        assert!(report.errors.iter().any(|e| e.contains("'name'")));
        assert!(report.errors.iter().any(|e| e.contains("'condition'")));
        assert!(report.errors.iter().any(|e| e.contains("'threshold'")));
    }

    #[test]
    fn test_worker_rules() {
        let mut config = minimal();
        config["workers"] = json!({
            "min_workers": 8,
            "max_workers": 2,
            "memory_limit": "lots",
            "backoff": "quadratic"
        });
        let report = ConfigValidator::new().validate(&config);
        assert!(report.errors.iter().any(|e| e.contains("min_workers")));
        assert!(report.errors.iter().any(|e| e.contains("memory_limit")));
        assert!(report.errors.iter().any(|e| e.contains("backoff")));
    }

    #[test]
    fn test_memory_limit_pattern_accepts_units() {
        for limit in ["128", "128K", "512M", "2G"] {
            let mut config = minimal();
            config["workers"] = json!({"memory_limit": limit});
            let report = ConfigValidator::new().validate(&config);
            assert!(report.is_valid(), "{limit} rejected: {:?}", report.errors);
        }
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut config = minimal();
        config["workers"] = json!({"min_workers": 5, "max_workers": 1});
        let validator = ConfigValidator::new();

        let first = validator.validate(&config);
        let second = validator.validate(&config);
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.warnings, second.warnings);
        assert_eq!(first.recommendations, second.recommendations);
    }

    #[test]
    fn test_recommendations() {
        let config = json!({
            "default": "db",
            "connections": {"db": {"driver": "database", "table": "jobs", "url": "postgres://h/q"}}
        });
        let report = ConfigValidator::new().validate(&config);
        assert!(report.is_valid());
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("connection pooling")));
        assert!(report.recommendations.iter().any(|r| r.contains("monitoring")));
    }

    #[test]
    fn test_batching_rules() {
        let mut config = minimal();
        config["batching"] = json!({"enabled": true, "size": 0});
        let report = ConfigValidator::new().validate(&config);
        assert!(report.errors.iter().any(|e| e.contains("batching.size")));
    }
}
