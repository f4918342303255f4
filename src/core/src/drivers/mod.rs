//! Queue driver abstraction.
//!
//! A driver provides the storage/transport for jobs: a relational table, an
//! in-memory list, a remote broker. The core never implements at-most-once
//! delivery itself — a driver's [`pop`](Driver::pop) is solely responsible
//! for handing a job to at most one of the workers racing on a queue (row
//! locking, atomic list pop, and so on).
//!
//! Built-in drivers: [`memory`], [`sync`], [`null`], [`redis`], [`database`].

pub mod database;
pub mod discovery;
pub mod memory;
pub mod null;
pub mod redis;
pub mod registry;
pub mod sync;

pub use database::DatabaseDriver;
pub use discovery::{DriverDiscovery, DriverProvider, DriverRecord, DriverValidation, SourceScope};
pub use memory::MemoryDriver;
pub use null::NullDriver;
pub use redis::RedisDriver;
pub use registry::{DriverFactory, DriverRegistry};
pub use sync::SyncDriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::jobs::{FailedJob, JobEnvelope, JobId};

// ═══════════════════════════════════════════════════════════════════════════════
// Driver Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver not found: {0}")]
    NotFound(String),

    #[error("invalid configuration for driver '{driver}': {}", errors.join("; "))]
    InvalidConfig { driver: String, errors: Vec<String> },

    #[error("driver backend error: {0}")]
    Backend(String),

    #[error("operation not supported by driver '{driver}': {operation}")]
    Unsupported { driver: String, operation: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Driver Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// A capability a driver advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverFeature {
    /// Jobs can be scheduled for a later time
    DelayedJobs,
    /// Jobs can carry a priority
    Priorities,
    /// Failed jobs are persisted for inspection/retry
    FailedJobStore,
    /// Multiple jobs can be enqueued atomically
    BulkPush,
    /// Storage survives process restart
    Persistent,
}

/// Static descriptor of a driver: immutable once constructed, used for
/// discovery validation and introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Driver name (required)
    pub name: String,
    /// Version string (recommended)
    #[serde(default)]
    pub version: String,
    /// Author name or organisation
    #[serde(default)]
    pub author: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Supported feature set
    #[serde(default)]
    pub features: Vec<DriverFeature>,
    /// Names of host capabilities or sibling drivers this driver requires
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl DriverInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            author: String::new(),
            description: String::new(),
            features: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = DriverFeature>) -> Self {
        self.features.extend(features);
        self
    }

    pub fn with_dependencies<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Whether the driver advertises a feature.
    pub fn supports(&self, feature: DriverFeature) -> bool {
        self.features.contains(&feature)
    }

    /// Return the declared dependencies that `available` does not satisfy.
    pub fn missing_dependencies<'a>(&'a self, available: &[String]) -> Vec<&'a str> {
        self.dependencies
            .iter()
            .filter(|d| !available.iter().any(|a| a == *d))
            .map(String::as_str)
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health / Stats
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a driver health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverHealth {
    /// Whether the backing store is reachable and usable
    pub healthy: bool,
    /// Human-readable status message
    pub message: String,
    /// Driver-specific metrics (counts, latencies)
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    /// How long the check took
    pub response_time_ms: u64,
}

impl DriverHealth {
    pub fn healthy(message: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            metrics: HashMap::new(),
            response_time_ms,
        }
    }

    pub fn unhealthy(message: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            metrics: HashMap::new(),
            response_time_ms,
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }
}

/// Per-queue statistics reported by a driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs ready to be popped now
    pub pending: u64,
    /// Jobs waiting for their availability time
    pub delayed: u64,
    /// Jobs in the failed store
    pub failed: u64,
    /// Total jobs pushed over the driver's lifetime
    pub pushed: u64,
    /// Total jobs popped over the driver's lifetime
    pub popped: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Driver Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The storage/transport contract every queue backend implements.
///
/// Construction happens through a factory registered with the
/// [`DriverRegistry`]; the factory receives the connection configuration, so
/// there is no separate `initialize` step.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver type name (e.g. "memory", "redis").
    fn name(&self) -> &str;

    /// The queue used when callers don't name one.
    fn default_queue(&self) -> &str {
        "default"
    }

    /// Enqueue a job for immediate availability. Returns the assigned id.
    async fn push(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        queue: Option<&str>,
    ) -> Result<JobId, DriverError>;

    /// Enqueue a job available only after `delay`.
    async fn later(
        &self,
        delay: Duration,
        job_type: &str,
        payload: serde_json::Value,
        queue: Option<&str>,
    ) -> Result<JobId, DriverError>;

    /// Enqueue several jobs; returns their ids in input order.
    async fn bulk(
        &self,
        jobs: Vec<(String, serde_json::Value)>,
        queue: Option<&str>,
    ) -> Result<Vec<JobId>, DriverError> {
        let mut ids = Vec::with_capacity(jobs.len());
        for (job_type, payload) in jobs {
            ids.push(self.push(&job_type, payload, queue).await?);
        }
        Ok(ids)
    }

    /// Claim the next available job, removing it from the ready store.
    /// `None` when the queue is empty.
    async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, DriverError>;

    /// Put a previously popped job back, available after `delay`.
    async fn release(&self, job: JobEnvelope, delay: Duration) -> Result<(), DriverError>;

    /// Number of jobs (ready + delayed) on a queue.
    async fn size(&self, queue: Option<&str>) -> Result<u64, DriverError>;

    /// Remove all jobs from a queue; returns how many were removed.
    async fn purge(&self, queue: Option<&str>) -> Result<u64, DriverError>;

    /// Driver statistics for a queue.
    async fn stats(&self, queue: Option<&str>) -> Result<QueueStats, DriverError>;

    /// Persist a job to the failed-jobs store.
    async fn failed(&self, job: &JobEnvelope, error: &str) -> Result<(), DriverError>;

    /// Jobs currently in the failed store.
    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, DriverError> {
        Ok(Vec::new())
    }

    /// Probe the backing store.
    async fn health_check(&self) -> DriverHealth;

    /// The driver's static descriptor.
    fn info(&self) -> DriverInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_info_builders() {
        let info = DriverInfo::new("redis")
            .with_version("1.2.0")
            .with_author("conveyor")
            .with_features([DriverFeature::DelayedJobs, DriverFeature::Persistent]);

        assert_eq!(info.name, "redis");
        assert!(info.supports(DriverFeature::DelayedJobs));
        assert!(!info.supports(DriverFeature::Priorities));
    }

    #[test]
    fn test_missing_dependencies() {
        let info = DriverInfo::new("custom").with_dependencies(["redis", "tls"]);
        let available = vec!["redis".to_string()];
        assert_eq!(info.missing_dependencies(&available), vec!["tls"]);
        assert!(info
            .missing_dependencies(&["redis".into(), "tls".into()])
            .is_empty());
    }

    #[test]
    fn test_driver_health() {
        let health = DriverHealth::healthy("ok", 3).with_metric("pending", 7);
        assert!(health.healthy);
        assert_eq!(health.metrics["pending"], serde_json::json!(7));
    }
}
