//! Job definitions and execution plumbing.
//!
//! - [`Job`]: the contract a worker processes — identity, attempt tracking,
//!   timeout, retry policy, and the release/failed transitions.
//! - [`JobEnvelope`]: the serialized record a driver stores and pops.
//! - [`QueuedJob`]: binds a popped envelope to its driver and the handler
//!   registry so it satisfies the [`Job`] contract.
//! - [`JobHandler`] / [`HandlerRegistry`]: resolve an opaque job-type string
//!   to executable logic.

pub mod envelope;
pub mod handler;

pub use envelope::{FailedJob, JobEnvelope, QueuedJob};
pub use handler::{FnHandler, HandlerRegistry, JobHandler};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for job execution failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    /// The error injected when a job exceeds its deadline. Treated as a
    /// normal, retryable job failure by the worker.
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            message: format!("job exceeded its timeout of {}s", timeout.as_secs()),
            retryable: true,
            code: Some("TIMEOUT".to_string()),
        }
    }

    /// Error produced when a job handler panics mid-execution.
    pub fn panicked(info: impl Into<String>) -> Self {
        Self {
            message: info.into(),
            retryable: true,
            code: Some("PANIC".to_string()),
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The contract a worker processes.
///
/// Once popped from a driver, a job is conceptually owned by the worker until
/// one of the terminal transitions runs: implicit deletion on success,
/// [`release`](Job::release) back to the queue with a delay, or
/// [`failed`](Job::failed) into the failed-jobs store.
#[async_trait]
pub trait Job: Send {
    /// Unique identifier assigned at creation.
    fn uuid(&self) -> JobId;

    /// Human-readable description for logs (typically the job type).
    fn description(&self) -> String;

    /// How many times this job has been attempted.
    fn attempts(&self) -> u32;

    /// Update the attempt counter (the worker increments it on failure).
    fn set_attempts(&mut self, attempts: u32);

    /// Attempt ceiling before the job is routed to the failed store.
    fn max_attempts(&self) -> u32;

    /// Per-execution deadline. Zero disables the deadline.
    fn timeout(&self) -> Duration;

    /// The job's own retry policy. Attempt counting is the worker's business;
    /// this answers "is this job retryable at all".
    fn should_retry(&self) -> bool {
        true
    }

    /// Name of the driver this job was popped from.
    fn driver(&self) -> &str;

    /// Execute the work.
    async fn fire(&mut self) -> JobResult;

    /// Put the job back on its queue, available after `delay`.
    async fn release(&mut self, delay: Duration) -> JobResult;

    /// Record the job in the failed-jobs store and run its failure callback.
    async fn failed(&mut self, error: &JobError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);

        let uuid = Uuid::new_v4();
        let id = JobId::from_uuid(uuid);
        assert_eq!(id.0, uuid);
    }

    #[test]
    fn test_job_error_constructors() {
        let e = JobError::retryable("network blip");
        assert!(e.retryable);
        assert!(e.code.is_none());

        let e = JobError::fatal("bad payload").with_code("PAYLOAD");
        assert!(!e.retryable);
        assert_eq!(e.code.as_deref(), Some("PAYLOAD"));

        let e = JobError::timed_out(Duration::from_secs(60));
        assert!(e.retryable);
        assert_eq!(e.code.as_deref(), Some("TIMEOUT"));
        assert!(e.message.contains("60"));
    }

    #[test]
    fn test_job_error_display() {
        let e = JobError::fatal("boom").with_code("X1");
        assert_eq!(e.to_string(), "boom (code: X1)");
    }
}
