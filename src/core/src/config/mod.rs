//! Configuration loading, merging, and resolution.
//!
//! [`ConfigManager`] takes a raw configuration tree (TOML or JSON file, or an
//! in-memory value), merges it over the hard-coded defaults (user values
//! win), resolves `env(KEY)` / `env(KEY, default)` placeholders with
//! bool/numeric coercion, validates the result, and deserializes the typed
//! [`QueueConfig`]. A failed validation at load time is fatal.
//!
//! Resolved trees are cached per source identity by the manager instance —
//! no process-wide statics; drop the manager (or call
//! [`clear_cache`](ConfigManager::clear_cache)) and the cache is gone.
//! Validation still runs on every load.

pub mod validator;

pub use validator::{ConfigValidator, ValidationReport};

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid configuration: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Typed Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// The validated queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name of the connection used when callers don't specify one.
    pub default: String,

    /// Connection name -> driver configuration. Kept as raw values because
    /// the keys are driver-specific.
    #[serde(default)]
    pub connections: BTreeMap<String, Value>,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub failed_jobs: FailedJobsConfig,

    #[serde(default)]
    pub batching: BatchingConfig,
}

impl QueueConfig {
    /// The configuration of one connection, if declared.
    pub fn connection(&self, name: &str) -> Option<&Value> {
        self.connections.get(name)
    }
}

/// Worker pool and auto-scaling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_min_workers")]
    pub min_workers: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    /// Memory ceiling per worker, `<digits>[K|M|G]`.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    /// Backoff strategy: linear, exponential, or fixed.
    #[serde(default = "default_backoff")]
    pub backoff: String,
    /// Idle sleep in seconds.
    #[serde(default = "default_sleep")]
    pub sleep: u64,
    /// Jobs before a worker recycles itself (0 = unlimited).
    #[serde(default)]
    pub max_jobs: u64,
    /// Wall-clock runtime in seconds before a worker recycles (0 = unlimited).
    #[serde(default)]
    pub max_time: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            memory_limit: default_memory_limit(),
            backoff: default_backoff(),
            sleep: default_sleep(),
            max_jobs: 0,
            max_time: 0,
        }
    }
}

impl WorkersConfig {
    /// The memory limit parsed into megabytes.
    pub fn memory_limit_mb(&self) -> u64 {
        let (digits, unit) = match self.memory_limit.find(|c: char| !c.is_ascii_digit()) {
            Some(pos) => self.memory_limit.split_at(pos),
            None => (self.memory_limit.as_str(), ""),
        };
        let value: u64 = digits.parse().unwrap_or(128);
        match unit {
            "K" => value / 1024,
            "G" => value * 1024,
            _ => value,
        }
    }
}

/// Monitoring and alerting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: u32,
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            metrics_retention_days: default_metrics_retention_days(),
            alerts: Vec::new(),
        }
    }
}

/// A single alert rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub condition: String,
    pub threshold: f64,
    #[serde(default = "default_severity")]
    pub severity: String,
}

/// Failed-job retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJobsConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for FailedJobsConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            max_retries: default_max_retries(),
        }
    }
}

/// Batch-processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub size: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: default_batch_size(),
        }
    }
}

// Default value functions
fn default_min_workers() -> u32 { 1 }
fn default_max_workers() -> u32 { 4 }
fn default_memory_limit() -> String { "128M".to_string() }
fn default_backoff() -> String { "exponential".to_string() }
fn default_sleep() -> u64 { 3 }
fn default_metrics_retention_days() -> u32 { 7 }
fn default_severity() -> String { "warning".to_string() }
fn default_retention_days() -> u32 { 7 }
fn default_max_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 10 }

// ═══════════════════════════════════════════════════════════════════════════════
// Config Manager
// ═══════════════════════════════════════════════════════════════════════════════

/// Loads and resolves queue configuration.
pub struct ConfigManager {
    validator: ConfigValidator,
    /// Resolved trees keyed by source identity.
    cache: Mutex<HashMap<String, Value>>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            validator: ConfigValidator::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The hard-coded defaults tree user configuration merges over.
    pub fn defaults() -> Value {
        json!({
            "default": "database",
            "connections": {
                "database": {
                    "driver": "database",
                    "table": "jobs",
                    "queue": "default",
                    "retry_after": 90
                }
            },
            "workers": {
                "min_workers": 1,
                "max_workers": 4,
                "memory_limit": "128M",
                "backoff": "exponential",
                "sleep": 3,
                "max_jobs": 0,
                "max_time": 0
            },
            "monitoring": {
                "enabled": false,
                "metrics_retention_days": 7,
                "alerts": []
            },
            "failed_jobs": {
                "retention_days": 7,
                "max_retries": 3
            },
            "batching": {
                "enabled": false,
                "size": 10
            }
        })
    }

    /// Load from a TOML or JSON file (dispatched on extension).
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Arc<QueueConfig>, ConfigError> {
        let path = path.as_ref();
        let identity = path.display().to_string();

        let cached = self.cache.lock().get(&identity).cloned();
        let resolved = match cached {
            Some(resolved) => resolved,
            None => {
                let raw = std::fs::read_to_string(path)?;
                let user = match path.extension().and_then(|e| e.to_str()) {
                    Some("toml") => {
                        let parsed: toml::Value =
                            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
                        serde_json::to_value(parsed).map_err(|e| ConfigError::Parse(e.to_string()))?
                    }
                    Some("json") => serde_json::from_str(&raw)
                        .map_err(|e| ConfigError::Parse(e.to_string()))?,
                    other => {
                        return Err(ConfigError::UnsupportedFormat(
                            other.unwrap_or("<none>").to_string(),
                        ))
                    }
                };
                self.resolve(&identity, user)
            }
        };

        self.finish(resolved)
    }

    /// Load from an in-memory tree, cached under `identity`.
    pub fn load_value(&self, identity: &str, user: Value) -> Result<Arc<QueueConfig>, ConfigError> {
        let cached = self.cache.lock().get(identity).cloned();
        let resolved = match cached {
            Some(resolved) => resolved,
            None => self.resolve(identity, user),
        };
        self.finish(resolved)
    }

    /// Drop a cached source so the next load re-reads and re-resolves it.
    pub fn reload(&self, identity: &str) {
        self.cache.lock().remove(identity);
    }

    /// Drop every cached source.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Validate a raw tree without loading it.
    pub fn validate(&self, config: &Value) -> ValidationReport {
        self.validator.validate(config)
    }

    fn resolve(&self, identity: &str, user: Value) -> Value {
        let merged = merge_values(Self::defaults(), user);
        let resolved = resolve_env_placeholders(merged);
        debug!(source = identity, "Configuration resolved");
        self.cache
            .lock()
            .insert(identity.to_string(), resolved.clone());
        resolved
    }

    /// Validation runs on every load, cached or not.
    fn finish(&self, resolved: Value) -> Result<Arc<QueueConfig>, ConfigError> {
        let report = self.validator.validate(&resolved);
        if !report.is_valid() {
            return Err(ConfigError::Invalid {
                errors: report.errors,
            });
        }
        for warning in &report.warnings {
            tracing::warn!(warning = %warning, "Configuration warning");
        }

        let config: QueueConfig =
            serde_json::from_value(resolved).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Arc::new(config))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Merge / Env Resolution
// ═══════════════════════════════════════════════════════════════════════════════

/// Recursive merge: tables merge key-by-key with `user` winning; any other
/// value pair resolves to `user`.
pub fn merge_values(defaults: Value, user: Value) -> Value {
    match (defaults, user) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, user) => user,
    }
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^env\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:,\s*(.*?)\s*)?\)$").expect("valid regex")
    })
}

/// Resolve `env(KEY)` / `env(KEY, default)` string markers recursively. A
/// missing variable without a default resolves to null. Resolved values are
/// coerced: `true`/`false` to booleans, integer and float literals to
/// numbers, everything else stays a string.
pub fn resolve_env_placeholders(value: Value) -> Value {
    match value {
        Value::String(s) => match env_pattern().captures(&s) {
            Some(captures) => {
                let key = &captures[1];
                let fallback = captures.get(2).map(|m| m.as_str().to_string());
                match std::env::var(key).ok().or(fallback) {
                    Some(raw) => coerce(&raw),
                    None => Value::Null,
                }
            }
            None => Value::String(s),
        },
        Value::Array(items) => {
            Value::Array(items.into_iter().map(resolve_env_placeholders).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve_env_placeholders(v)))
                .collect(),
        ),
        other => other,
    }
}

fn coerce(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_user_wins() {
        let defaults = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let user = json!({"nested": {"y": 20, "z": 30}, "b": 2});
        let merged = merge_values(defaults, user);
        assert_eq!(merged, json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 20, "z": 30}}));
    }

    #[test]
    fn test_env_resolution_with_coercion() {
        std::env::set_var("CONVEYOR_TEST_PORT", "6380");
        std::env::set_var("CONVEYOR_TEST_VERBOSE", "true");

        let tree = json!({
            "port": "env(CONVEYOR_TEST_PORT)",
            "verbose": "env(CONVEYOR_TEST_VERBOSE)",
            "host": "env(CONVEYOR_TEST_UNSET_HOST, localhost)",
            "ratio": "env(CONVEYOR_TEST_UNSET_RATIO, 0.5)",
            "missing": "env(CONVEYOR_TEST_UNSET_MISSING)",
            "plain": "not-a-placeholder"
        });
        let resolved = resolve_env_placeholders(tree);

        assert_eq!(resolved["port"], json!(6380));
        assert_eq!(resolved["verbose"], json!(true));
        assert_eq!(resolved["host"], json!("localhost"));
        assert_eq!(resolved["ratio"], json!(0.5));
        assert_eq!(resolved["missing"], Value::Null);
        assert_eq!(resolved["plain"], json!("not-a-placeholder"));
    }

    #[test]
    fn test_load_value_merges_defaults() {
        let manager = ConfigManager::new();
        let config = manager
            .load_value(
                "test",
                json!({
                    "default": "mem",
                    "connections": {"mem": {"driver": "memory"}}
                }),
            )
            .unwrap();

        assert_eq!(config.default, "mem");
        // Defaults survive the merge.
        assert!(config.connections.contains_key("database"));
        assert_eq!(config.workers.sleep, 3);
        assert_eq!(config.failed_jobs.max_retries, 3);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let manager = ConfigManager::new();
        let result = manager.load_value(
            "bad",
            json!({
                "default": "nowhere",
                "connections": {"mem": {"driver": "memory"}}
            }),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_cache_and_reload() {
        std::env::set_var("CONVEYOR_TEST_CACHE_QUEUE", "first");
        let manager = ConfigManager::new();
        let user = json!({
            "default": "mem",
            "connections": {"mem": {"driver": "memory", "queue": "env(CONVEYOR_TEST_CACHE_QUEUE)"}}
        });

        let config = manager.load_value("cached", user.clone()).unwrap();
        assert_eq!(config.connections["mem"]["queue"], json!("first"));

        // Cached: the env change is not visible until reload.
        std::env::set_var("CONVEYOR_TEST_CACHE_QUEUE", "second");
        let config = manager.load_value("cached", user.clone()).unwrap();
        assert_eq!(config.connections["mem"]["queue"], json!("first"));

        manager.reload("cached");
        let config = manager.load_value("cached", user).unwrap();
        assert_eq!(config.connections["mem"]["queue"], json!("second"));
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.toml");
        std::fs::write(
            &path,
            r#"
default = "mem"

[connections.mem]
driver = "memory"

[workers]
sleep = 1
"#,
        )
        .unwrap();

        let manager = ConfigManager::new();
        let config = manager.load_file(&path).unwrap();
        assert_eq!(config.default, "mem");
        assert_eq!(config.workers.sleep, 1);
    }

    #[test]
    fn test_memory_limit_mb() {
        let workers = WorkersConfig {
            memory_limit: "2G".to_string(),
            ..WorkersConfig::default()
        };
        assert_eq!(workers.memory_limit_mb(), 2048);

        let workers = WorkersConfig {
            memory_limit: "256".to_string(),
            ..WorkersConfig::default()
        };
        assert_eq!(workers.memory_limit_mb(), 256);
    }
}
