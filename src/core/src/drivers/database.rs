//! Relational-table queue driver (PostgreSQL via `sqlx`).
//!
//! Jobs live in one table with the serialized envelope in a `jsonb` column
//! and `queue`/`available_at` alongside for indexing; failed jobs in a
//! `<table>_failed` sibling. `pop` claims with `FOR UPDATE SKIP LOCKED`
//! inside a transaction, so concurrent workers never receive the same row.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id           UUID PRIMARY KEY,
//!     queue        TEXT NOT NULL,
//!     payload      JSONB NOT NULL,
//!     available_at TIMESTAMPTZ NOT NULL,
//!     created_at   TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX jobs_queue_available_idx ON jobs (queue, available_at);
//!
//! CREATE TABLE jobs_failed (
//!     id        UUID PRIMARY KEY,
//!     payload   JSONB NOT NULL,
//!     error     TEXT NOT NULL,
//!     failed_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::{Duration, Instant};

use super::{Driver, DriverError, DriverFeature, DriverHealth, DriverInfo, QueueStats};
use crate::jobs::{FailedJob, JobEnvelope, JobId};

/// Validate a database connection configuration; returns human-readable
/// errors.
pub fn validate_config(config: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();

    match config.get("table").and_then(|v| v.as_str()) {
        None | Some("") => errors.push("database driver requires a 'table'".to_string()),
        Some(table) if !is_safe_identifier(table) => {
            errors.push(format!(
                "database 'table' must contain only alphanumerics and underscores (got '{table}')"
            ));
        }
        Some(_) => {}
    }
    if let Some(retry_after) = config.get("retry_after").and_then(|v| v.as_i64()) {
        if retry_after < 0 {
            errors.push(format!("database 'retry_after' must be non-negative (got {retry_after})"));
        }
    }

    errors
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// PostgreSQL queue driver.
pub struct DatabaseDriver {
    pool: PgPool,
    table: String,
    failed_table: String,
    default_queue: String,
}

impl DatabaseDriver {
    /// Build from a connection configuration. Required: `table`; the
    /// connection string comes from `url` or the `DATABASE_URL` environment
    /// variable. The pool connects lazily on first use.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, DriverError> {
        let mut errors = validate_config(config);

        let url = config
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| std::env::var("DATABASE_URL").ok());
        if url.is_none() {
            errors.push("database driver requires a 'url' (or DATABASE_URL in the environment)".to_string());
        }
        if !errors.is_empty() {
            return Err(DriverError::InvalidConfig {
                driver: "database".to_string(),
                errors,
            });
        }

        let url = url.unwrap_or_default();
        let table = config
            .get("table")
            .and_then(|v| v.as_str())
            .unwrap_or("jobs")
            .to_string();
        let pool = PgPoolOptions::new()
            .max_connections(config.get("pool_size").and_then(|v| v.as_u64()).unwrap_or(5) as u32)
            .connect_lazy(&url)
            .map_err(|e| DriverError::Backend(format!("invalid database url: {e}")))?;

        Ok(Self {
            failed_table: format!("{table}_failed"),
            table,
            pool,
            default_queue: config
                .get("queue")
                .and_then(|v| v.as_str())
                .unwrap_or("default")
                .to_string(),
        })
    }

    pub fn driver_info() -> DriverInfo {
        DriverInfo::new("database")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_author("conveyor")
            .with_description("Relational job table with SKIP LOCKED claiming (PostgreSQL)")
            .with_features([
                DriverFeature::DelayedJobs,
                DriverFeature::FailedJobStore,
                DriverFeature::BulkPush,
                DriverFeature::Persistent,
            ])
    }

    fn queue_name<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }

    async fn insert(&self, envelope: &JobEnvelope) -> Result<(), DriverError> {
        let sql = format!(
            "INSERT INTO {} (id, queue, payload, available_at, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
            self.table
        );
        sqlx::query(&sql)
            .bind(envelope.id.0)
            .bind(&envelope.queue)
            .bind(serde_json::to_value(envelope)?)
            .bind(envelope.available_at)
            .bind(envelope.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Backend(format!("insert failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Driver for DatabaseDriver {
    fn name(&self) -> &str {
        "database"
    }

    fn default_queue(&self) -> &str {
        &self.default_queue
    }

    async fn push(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        queue: Option<&str>,
    ) -> Result<JobId, DriverError> {
        let envelope = JobEnvelope::new(job_type, payload, self.queue_name(queue));
        let id = envelope.id;
        self.insert(&envelope).await?;
        Ok(id)
    }

    async fn later(
        &self,
        delay: Duration,
        job_type: &str,
        payload: serde_json::Value,
        queue: Option<&str>,
    ) -> Result<JobId, DriverError> {
        let envelope =
            JobEnvelope::new(job_type, payload, self.queue_name(queue)).with_delay(delay);
        let id = envelope.id;
        self.insert(&envelope).await?;
        Ok(id)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, DriverError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DriverError::Backend(format!("begin failed: {e}")))?;

        let select = format!(
            "SELECT id, payload FROM {} \
             WHERE queue = $1 AND available_at <= $2 \
             ORDER BY created_at \
             LIMIT 1 FOR UPDATE SKIP LOCKED",
            self.table
        );
        let row = sqlx::query(&select)
            .bind(queue)
            .bind(Utc::now())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| DriverError::Backend(format!("select failed: {e}")))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| DriverError::Backend(format!("rollback failed: {e}")))?;
            return Ok(None);
        };

        let id: uuid::Uuid = row
            .try_get("id")
            .map_err(|e| DriverError::Backend(format!("bad row: {e}")))?;
        let payload: serde_json::Value = row
            .try_get("payload")
            .map_err(|e| DriverError::Backend(format!("bad row: {e}")))?;

        let delete = format!("DELETE FROM {} WHERE id = $1", self.table);
        sqlx::query(&delete)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| DriverError::Backend(format!("delete failed: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| DriverError::Backend(format!("commit failed: {e}")))?;

        Ok(Some(serde_json::from_value(payload)?))
    }

    async fn release(&self, job: JobEnvelope, delay: Duration) -> Result<(), DriverError> {
        self.insert(&job.with_delay(delay)).await
    }

    async fn size(&self, queue: Option<&str>) -> Result<u64, DriverError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE queue = $1", self.table);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(self.queue_name(queue))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DriverError::Backend(format!("count failed: {e}")))?;
        Ok(count as u64)
    }

    async fn purge(&self, queue: Option<&str>) -> Result<u64, DriverError> {
        let sql = format!("DELETE FROM {} WHERE queue = $1", self.table);
        let result = sqlx::query(&sql)
            .bind(self.queue_name(queue))
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Backend(format!("purge failed: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn stats(&self, queue: Option<&str>) -> Result<QueueStats, DriverError> {
        let queue = self.queue_name(queue);
        let now = Utc::now();

        let pending_sql = format!(
            "SELECT COUNT(*) FROM {} WHERE queue = $1 AND available_at <= $2",
            self.table
        );
        let pending: i64 = sqlx::query_scalar(&pending_sql)
            .bind(queue)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DriverError::Backend(format!("count failed: {e}")))?;

        let delayed_sql = format!(
            "SELECT COUNT(*) FROM {} WHERE queue = $1 AND available_at > $2",
            self.table
        );
        let delayed: i64 = sqlx::query_scalar(&delayed_sql)
            .bind(queue)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DriverError::Backend(format!("count failed: {e}")))?;

        let failed_sql = format!("SELECT COUNT(*) FROM {}", self.failed_table);
        let failed: i64 = sqlx::query_scalar(&failed_sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DriverError::Backend(format!("count failed: {e}")))?;

        Ok(QueueStats {
            pending: pending as u64,
            delayed: delayed as u64,
            failed: failed as u64,
            ..QueueStats::default()
        })
    }

    async fn failed(&self, job: &JobEnvelope, error: &str) -> Result<(), DriverError> {
        let sql = format!(
            "INSERT INTO {} (id, payload, error, failed_at) VALUES ($1, $2, $3, $4)",
            self.failed_table
        );
        sqlx::query(&sql)
            .bind(job.id.0)
            .bind(serde_json::to_value(job)?)
            .bind(error)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Backend(format!("failed-store insert failed: {e}")))?;
        Ok(())
    }

    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, DriverError> {
        let sql = format!("SELECT payload, error, failed_at FROM {}", self.failed_table);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DriverError::Backend(format!("failed-store select failed: {e}")))?;

        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row
                    .try_get("payload")
                    .map_err(|e| DriverError::Backend(format!("bad row: {e}")))?;
                let error: String = row
                    .try_get("error")
                    .map_err(|e| DriverError::Backend(format!("bad row: {e}")))?;
                let failed_at = row
                    .try_get("failed_at")
                    .map_err(|e| DriverError::Backend(format!("bad row: {e}")))?;
                Ok(FailedJob {
                    job: serde_json::from_value(payload)?,
                    error,
                    failed_at,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> DriverHealth {
        let started = Instant::now();
        let probe: Result<i64, _> = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await;
        let elapsed = started.elapsed().as_millis() as u64;
        match probe {
            Ok(_) => DriverHealth::healthy("database reachable", elapsed),
            Err(e) => DriverHealth::unhealthy(format!("probe failed: {e}"), elapsed),
        }
    }

    fn info(&self) -> DriverInfo {
        Self::driver_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_config_requires_table() {
        let errors = validate_config(&json!({"driver": "database"}));
        assert!(errors.iter().any(|e| e.contains("table")));
    }

    #[test]
    fn test_validate_config_rejects_unsafe_table() {
        let errors = validate_config(&json!({"table": "jobs; DROP TABLE users"}));
        assert!(errors.iter().any(|e| e.contains("alphanumerics")));
    }

    #[test]
    fn test_validate_config_negative_retry_after() {
        let errors = validate_config(&json!({"table": "jobs", "retry_after": -5}));
        assert!(errors.iter().any(|e| e.contains("non-negative")));
    }

    #[test]
    fn test_validate_config_ok() {
        assert!(validate_config(&json!({"table": "jobs", "retry_after": 90})).is_empty());
    }

    #[tokio::test]
    async fn test_from_config_builds_lazily() {
        let driver = DatabaseDriver::from_config(&json!({
            "table": "jobs",
            "url": "postgres://localhost/conveyor_test"
        }))
        .unwrap();
        assert_eq!(driver.name(), "database");
        assert_eq!(driver.failed_table, "jobs_failed");
    }
}
