//! Job-type resolution.
//!
//! A pushed job carries an opaque `job_type` string; the [`HandlerRegistry`]
//! maps it to the [`JobHandler`] that knows how to execute the payload.
//! Handlers are registered once at process startup, before any worker is
//! started.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;

use super::envelope::JobEnvelope;
use super::{JobError, JobResult};

/// Executable logic for one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job. The envelope carries the payload and attempt metadata.
    async fn handle(&self, job: &JobEnvelope) -> JobResult;

    /// Failure callback, invoked once when the job is moved to the failed
    /// store (attempts exhausted or non-retryable error).
    async fn on_failure(&self, _job: &JobEnvelope, _error: &JobError) {}
}

/// Adapter so plain async closures can serve as handlers.
pub struct FnHandler<F>(pub F)
where
    F: Fn(JobEnvelope) -> BoxFuture<'static, JobResult> + Send + Sync;

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: Fn(JobEnvelope) -> BoxFuture<'static, JobResult> + Send + Sync,
{
    async fn handle(&self, job: &JobEnvelope) -> JobResult {
        (self.0)(job.clone()).await
    }
}

/// Registry mapping job-type identifiers to handlers.
///
/// Last registration wins for a given job type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `job_type`.
    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    /// Register an async closure as the handler for `job_type`.
    pub fn register_fn<F>(&self, job_type: impl Into<String>, f: F)
    where
        F: Fn(JobEnvelope) -> BoxFuture<'static, JobResult> + Send + Sync + 'static,
    {
        self.register(job_type, Arc::new(FnHandler(f)));
    }

    /// Look up the handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).map(|h| Arc::clone(h.value()))
    }

    /// Whether a handler is registered for `job_type`.
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// All registered job types.
    pub fn job_types(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}
