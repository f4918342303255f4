//! The stored form of a job and its worker-facing binding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::handler::HandlerRegistry;
use super::{Job, JobError, JobId, JobResult};
use crate::drivers::Driver;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Envelope
// ═══════════════════════════════════════════════════════════════════════════════

/// The serialized record a driver stores: everything needed to execute the
/// job later, independent of the process that pushed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Unique identifier assigned at creation
    pub id: JobId,
    /// Opaque job-type identifier, resolved through the handler registry
    pub job_type: String,
    /// Key/value payload
    pub payload: serde_json::Value,
    /// Target queue name
    pub queue: String,
    /// Number of execution attempts so far
    pub attempts: u32,
    /// Attempt ceiling before the job is failed
    pub max_attempts: u32,
    /// Per-execution deadline in seconds (0 = none)
    pub timeout_secs: u64,
    /// Earliest time the job may be popped
    pub available_at: DateTime<Utc>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Create an immediately-available envelope with default attempt and
    /// timeout settings.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value, queue: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            queue: queue.into(),
            attempts: 0,
            max_attempts: 3,
            timeout_secs: 60,
            available_at: now,
            created_at: now,
        }
    }

    /// Set the attempt ceiling.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the execution deadline in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Delay availability by `delay` from now.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self
    }

    /// Whether the job may be popped at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.available_at <= now
    }
}

/// A job that exhausted its attempts or hit a non-retryable error, as
/// persisted in a driver's failed-jobs store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    /// The job as it looked when it failed
    pub job: JobEnvelope,
    /// The final error message
    pub error: String,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

impl FailedJob {
    pub fn new(job: JobEnvelope, error: impl Into<String>) -> Self {
        Self {
            job,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queued Job
// ═══════════════════════════════════════════════════════════════════════════════

/// A popped envelope bound to the driver that owns its backing store and the
/// handler registry that resolves its job type.
///
/// This is the [`Job`] implementation the worker's daemon loop processes;
/// tests and embedders can supply their own `Job` implementations directly.
pub struct QueuedJob {
    envelope: JobEnvelope,
    driver: Arc<dyn Driver>,
    handlers: Arc<HandlerRegistry>,
}

impl QueuedJob {
    pub fn new(envelope: JobEnvelope, driver: Arc<dyn Driver>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            envelope,
            driver,
            handlers,
        }
    }

    /// The underlying envelope.
    pub fn envelope(&self) -> &JobEnvelope {
        &self.envelope
    }
}

#[async_trait]
impl Job for QueuedJob {
    fn uuid(&self) -> JobId {
        self.envelope.id
    }

    fn description(&self) -> String {
        self.envelope.job_type.clone()
    }

    fn attempts(&self) -> u32 {
        self.envelope.attempts
    }

    fn set_attempts(&mut self, attempts: u32) {
        self.envelope.attempts = attempts;
    }

    fn max_attempts(&self) -> u32 {
        self.envelope.max_attempts
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.envelope.timeout_secs)
    }

    fn driver(&self) -> &str {
        self.driver.name()
    }

    async fn fire(&mut self) -> JobResult {
        let handler = self.handlers.get(&self.envelope.job_type).ok_or_else(|| {
            JobError::fatal(format!(
                "no handler registered for job type '{}'",
                self.envelope.job_type
            ))
        })?;
        handler.handle(&self.envelope).await
    }

    async fn release(&mut self, delay: Duration) -> JobResult {
        self.driver
            .release(self.envelope.clone(), delay)
            .await
            .map_err(|e| JobError::retryable(format!("release failed: {e}")))
    }

    async fn failed(&mut self, error: &JobError) {
        if let Err(e) = self.driver.failed(&self.envelope, &error.to_string()).await {
            warn!(
                job_id = %self.envelope.id,
                job_type = %self.envelope.job_type,
                error = %e,
                "Failed to persist job to failed-jobs store"
            );
        }
        if let Some(handler) = self.handlers.get(&self.envelope.job_type) {
            handler.on_failure(&self.envelope, error).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_builders() {
        let envelope = JobEnvelope::new("email", serde_json::json!({"to": "a@b.com"}), "default")
            .with_max_attempts(5)
            .with_timeout(120);

        assert_eq!(envelope.max_attempts, 5);
        assert_eq!(envelope.timeout_secs, 120);
        assert_eq!(envelope.attempts, 0);
        assert!(envelope.is_ready(Utc::now()));
    }

    #[test]
    fn test_envelope_delay() {
        let envelope = JobEnvelope::new("email", serde_json::json!({}), "default")
            .with_delay(Duration::from_secs(60));
        assert!(!envelope.is_ready(Utc::now()));
        assert!(envelope.is_ready(Utc::now() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = JobEnvelope::new("report", serde_json::json!({"month": 7}), "reports");
        let json = serde_json::to_string(&envelope).unwrap();
        let back: JobEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, envelope.id);
        assert_eq!(back.job_type, "report");
        assert_eq!(back.queue, "reports");
    }
}
