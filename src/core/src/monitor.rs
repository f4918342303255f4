//! Worker monitoring contract.
//!
//! The worker reports its lifecycle to a [`WorkerMonitor`]: registration at
//! daemon start, heartbeats each loop iteration, per-job start/success/
//! failure, and unregistration with final stats. Monitoring is best-effort —
//! the worker logs monitor errors and keeps draining; implementations must
//! tolerate concurrent calls from many worker processes.
//!
//! Ships [`NullMonitor`] (the no-op default) and [`InMemoryMonitor`] (used by
//! tests and the CLI's stats output).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::jobs::JobId;

#[derive(Debug, Error)]
#[error("monitor error: {0}")]
pub struct MonitorError(pub String);

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-worker registration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub uuid: Uuid,
    pub connection: String,
    pub queue: String,
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
}

/// Periodic liveness/status update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub last_seen: DateTime<Utc>,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub memory_mb: u64,
}

/// Stats reported at unregistration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFinalStats {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub stopped_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Monitor Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The monitoring collaborator contract.
pub trait WorkerMonitor: Send + Sync {
    fn register_worker(&self, registration: WorkerRegistration) -> Result<(), MonitorError>;

    fn update_heartbeat(&self, uuid: Uuid, heartbeat: WorkerHeartbeat) -> Result<(), MonitorError>;

    fn unregister_worker(&self, uuid: Uuid, final_stats: WorkerFinalStats)
        -> Result<(), MonitorError>;

    fn record_job_start(&self, job_id: JobId, job_type: &str);

    fn record_job_success(&self, job_id: JobId, duration: Duration);

    fn record_job_failure(&self, job_id: JobId, duration: Duration, error: &str);
}

/// Monitor that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl WorkerMonitor for NullMonitor {
    fn register_worker(&self, _registration: WorkerRegistration) -> Result<(), MonitorError> {
        Ok(())
    }

    fn update_heartbeat(&self, _uuid: Uuid, _heartbeat: WorkerHeartbeat) -> Result<(), MonitorError> {
        Ok(())
    }

    fn unregister_worker(
        &self,
        _uuid: Uuid,
        _final_stats: WorkerFinalStats,
    ) -> Result<(), MonitorError> {
        Ok(())
    }

    fn record_job_start(&self, _job_id: JobId, _job_type: &str) {}

    fn record_job_success(&self, _job_id: JobId, _duration: Duration) {}

    fn record_job_failure(&self, _job_id: JobId, _duration: Duration, _error: &str) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Monitor
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct WorkerEntry {
    registration: WorkerRegistration,
    heartbeat: Option<WorkerHeartbeat>,
}

/// Monitor keeping worker state in process memory. Safe for concurrent
/// register/heartbeat/unregister calls from many workers.
#[derive(Default)]
pub struct InMemoryMonitor {
    workers: RwLock<HashMap<Uuid, WorkerEntry>>,
    jobs_started: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
}

impl InMemoryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrations of currently-registered workers.
    pub fn registered_workers(&self) -> Vec<WorkerRegistration> {
        self.workers
            .read()
            .values()
            .map(|e| e.registration.clone())
            .collect()
    }

    /// Last heartbeat for a worker, if any.
    pub fn heartbeat(&self, uuid: Uuid) -> Option<WorkerHeartbeat> {
        self.workers.read().get(&uuid).and_then(|e| e.heartbeat.clone())
    }

    pub fn jobs_started(&self) -> u64 {
        self.jobs_started.load(Ordering::Relaxed)
    }

    pub fn jobs_succeeded(&self) -> u64 {
        self.jobs_succeeded.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }
}

impl WorkerMonitor for InMemoryMonitor {
    fn register_worker(&self, registration: WorkerRegistration) -> Result<(), MonitorError> {
        self.workers.write().insert(
            registration.uuid,
            WorkerEntry {
                registration,
                heartbeat: None,
            },
        );
        Ok(())
    }

    fn update_heartbeat(&self, uuid: Uuid, heartbeat: WorkerHeartbeat) -> Result<(), MonitorError> {
        match self.workers.write().get_mut(&uuid) {
            Some(entry) => {
                entry.heartbeat = Some(heartbeat);
                Ok(())
            }
            None => Err(MonitorError(format!("worker {uuid} is not registered"))),
        }
    }

    fn unregister_worker(
        &self,
        uuid: Uuid,
        _final_stats: WorkerFinalStats,
    ) -> Result<(), MonitorError> {
        self.workers.write().remove(&uuid);
        Ok(())
    }

    fn record_job_start(&self, _job_id: JobId, _job_type: &str) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_job_success(&self, _job_id: JobId, _duration: Duration) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_job_failure(&self, _job_id: JobId, _duration: Duration, _error: &str) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }
}
