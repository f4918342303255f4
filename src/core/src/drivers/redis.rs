//! Redis-backed queue driver.
//!
//! Ready jobs live in a list per queue (`RPUSH`/`LPOP`), delayed jobs in a
//! sorted set scored by availability time and promoted on `pop`, failed jobs
//! in a list. Promotion claims each member with `ZREM` so two workers racing
//! on the same delayed job cannot both enqueue it.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{Driver, DriverError, DriverFeature, DriverHealth, DriverInfo, QueueStats};
use crate::jobs::{FailedJob, JobEnvelope, JobId};

/// Redis queue driver.
pub struct RedisDriver {
    client: redis::Client,
    prefix: String,
    default_queue: String,
}

/// Validate a redis connection configuration; returns human-readable errors.
pub fn validate_config(config: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();

    if config.get("host").and_then(|v| v.as_str()).map_or(true, str::is_empty) {
        errors.push("redis driver requires a 'host'".to_string());
    }
    match config.get("port").and_then(|v| v.as_i64()) {
        Some(port) if (1..=65535).contains(&port) => {}
        Some(port) => errors.push(format!("redis 'port' must be between 1 and 65535 (got {port})")),
        None => errors.push("redis driver requires a 'port'".to_string()),
    }
    if let Some(db) = config.get("database").and_then(|v| v.as_i64()) {
        if !(0..=15).contains(&db) {
            errors.push(format!("redis 'database' index must be between 0 and 15 (got {db})"));
        }
    }
    for key in ["timeout", "connect_timeout"] {
        if let Some(value) = config.get(key).and_then(|v| v.as_f64()) {
            if value < 0.0 {
                errors.push(format!("redis '{key}' must be non-negative (got {value})"));
            }
        }
    }

    errors
}

impl RedisDriver {
    /// Build from a connection configuration. Required: `host`, `port`.
    /// Optional: `password`, `database` (0-15), `prefix`, `queue`.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, DriverError> {
        let errors = validate_config(config);
        if !errors.is_empty() {
            return Err(DriverError::InvalidConfig {
                driver: "redis".to_string(),
                errors,
            });
        }

        let host = config.get("host").and_then(|v| v.as_str()).unwrap_or("127.0.0.1");
        let port = config.get("port").and_then(|v| v.as_i64()).unwrap_or(6379);
        let database = config.get("database").and_then(|v| v.as_i64()).unwrap_or(0);
        let url = match config.get("password").and_then(|v| v.as_str()) {
            Some(password) => format!("redis://:{password}@{host}:{port}/{database}"),
            None => format!("redis://{host}:{port}/{database}"),
        };

        let client = redis::Client::open(url)
            .map_err(|e| DriverError::Backend(format!("invalid redis connection: {e}")))?;

        Ok(Self {
            client,
            prefix: config
                .get("prefix")
                .and_then(|v| v.as_str())
                .unwrap_or("conveyor")
                .to_string(),
            default_queue: config
                .get("queue")
                .and_then(|v| v.as_str())
                .unwrap_or("default")
                .to_string(),
        })
    }

    pub fn driver_info() -> DriverInfo {
        DriverInfo::new("redis")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_author("conveyor")
            .with_description("Redis lists for ready jobs, sorted set for delayed jobs")
            .with_features([
                DriverFeature::DelayedJobs,
                DriverFeature::FailedJobStore,
                DriverFeature::BulkPush,
                DriverFeature::Persistent,
            ])
    }

    async fn conn(&self) -> Result<MultiplexedConnection, DriverError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DriverError::Backend(format!("redis connection failed: {e}")))
    }

    fn queue_key(&self, queue: &str) -> String {
        format!("{}:queue:{queue}", self.prefix)
    }

    fn delayed_key(&self, queue: &str) -> String {
        format!("{}:delayed:{queue}", self.prefix)
    }

    fn failed_key(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    fn queue_name<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }

    async fn enqueue(&self, envelope: &JobEnvelope) -> Result<(), DriverError> {
        let serialized = serde_json::to_string(envelope)?;
        let mut conn = self.conn().await?;
        redis::cmd("RPUSH")
            .arg(self.queue_key(&envelope.queue))
            .arg(serialized)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("RPUSH failed: {e}")))?;
        Ok(())
    }

    async fn enqueue_delayed(&self, envelope: &JobEnvelope) -> Result<(), DriverError> {
        let serialized = serde_json::to_string(envelope)?;
        let mut conn = self.conn().await?;
        redis::cmd("ZADD")
            .arg(self.delayed_key(&envelope.queue))
            .arg(envelope.available_at.timestamp())
            .arg(serialized)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("ZADD failed: {e}")))?;
        Ok(())
    }

    /// Move due members from the delayed set to the ready list. Each member
    /// is claimed via `ZREM` before it is re-enqueued.
    async fn promote_delayed(&self, queue: &str) -> Result<(), DriverError> {
        let mut conn = self.conn().await?;
        let delayed_key = self.delayed_key(queue);
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&delayed_key)
            .arg("-inf")
            .arg(Utc::now().timestamp())
            .arg("LIMIT")
            .arg(0)
            .arg(100)
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("ZRANGEBYSCORE failed: {e}")))?;

        for member in due {
            let removed: i64 = redis::cmd("ZREM")
                .arg(&delayed_key)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(|e| DriverError::Backend(format!("ZREM failed: {e}")))?;
            if removed == 1 {
                redis::cmd("RPUSH")
                    .arg(self.queue_key(queue))
                    .arg(&member)
                    .query_async::<_, i64>(&mut conn)
                    .await
                    .map_err(|e| DriverError::Backend(format!("RPUSH failed: {e}")))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for RedisDriver {
    fn name(&self) -> &str {
        "redis"
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
        self.enqueue(&envelope).await?;
        debug!(job_id = %id, queue = %envelope.queue, "Job enqueued");
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
        self.enqueue_delayed(&envelope).await?;
        Ok(id)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, DriverError> {
        self.promote_delayed(queue).await?;

        let mut conn = self.conn().await?;
        let raw: Option<String> = redis::cmd("LPOP")
            .arg(self.queue_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("LPOP failed: {e}")))?;

        match raw {
            Some(serialized) => Ok(Some(serde_json::from_str(&serialized)?)),
            None => Ok(None),
        }
    }

    async fn release(&self, job: JobEnvelope, delay: Duration) -> Result<(), DriverError> {
        let released = job.with_delay(delay);
        if delay.is_zero() {
            self.enqueue(&released).await
        } else {
            self.enqueue_delayed(&released).await
        }
    }

    async fn size(&self, queue: Option<&str>) -> Result<u64, DriverError> {
        let queue = self.queue_name(queue);
        let mut conn = self.conn().await?;
        let ready: i64 = redis::cmd("LLEN")
            .arg(self.queue_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("LLEN failed: {e}")))?;
        let delayed: i64 = redis::cmd("ZCARD")
            .arg(self.delayed_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("ZCARD failed: {e}")))?;
        Ok((ready + delayed) as u64)
    }

    async fn purge(&self, queue: Option<&str>) -> Result<u64, DriverError> {
        let queue = self.queue_name(queue);
        let count = self.size(Some(queue)).await?;
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(self.queue_key(queue))
            .arg(self.delayed_key(queue))
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("DEL failed: {e}")))?;
        Ok(count)
    }

    async fn stats(&self, queue: Option<&str>) -> Result<QueueStats, DriverError> {
        let queue = self.queue_name(queue);
        let mut conn = self.conn().await?;
        let pending: i64 = redis::cmd("LLEN")
            .arg(self.queue_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("LLEN failed: {e}")))?;
        let delayed: i64 = redis::cmd("ZCARD")
            .arg(self.delayed_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("ZCARD failed: {e}")))?;
        let failed: i64 = redis::cmd("LLEN")
            .arg(self.failed_key())
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("LLEN failed: {e}")))?;

        Ok(QueueStats {
            pending: pending as u64,
            delayed: delayed as u64,
            failed: failed as u64,
            ..QueueStats::default()
        })
    }

    async fn failed(&self, job: &JobEnvelope, error: &str) -> Result<(), DriverError> {
        let record = serde_json::to_string(&FailedJob::new(job.clone(), error))?;
        let mut conn = self.conn().await?;
        redis::cmd("RPUSH")
            .arg(self.failed_key())
            .arg(record)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("RPUSH failed: {e}")))?;
        Ok(())
    }

    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, DriverError> {
        let mut conn = self.conn().await?;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.failed_key())
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("LRANGE failed: {e}")))?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(DriverError::from))
            .collect()
    }

    async fn health_check(&self) -> DriverHealth {
        let started = Instant::now();
        match self.conn().await {
            Ok(mut conn) => {
                let ping: Result<String, _> =
                    redis::cmd("PING").query_async(&mut conn).await;
                let elapsed = started.elapsed().as_millis() as u64;
                match ping {
                    Ok(_) => DriverHealth::healthy("redis reachable", elapsed),
                    Err(e) => DriverHealth::unhealthy(format!("PING failed: {e}"), elapsed),
                }
            }
            Err(e) => DriverHealth::unhealthy(e.to_string(), started.elapsed().as_millis() as u64),
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
    fn test_validate_config_requires_host_and_port() {
        let errors = validate_config(&json!({}));
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("host")));
        assert!(errors.iter().any(|e| e.contains("port")));
    }

    #[test]
    fn test_validate_config_port_range() {
        let errors = validate_config(&json!({"host": "localhost", "port": 99999}));
        assert!(errors.iter().any(|e| e.contains("between 1 and 65535")));
    }

    #[test]
    fn test_validate_config_database_index() {
        let errors = validate_config(&json!({"host": "localhost", "port": 6379, "database": 31}));
        assert!(errors.iter().any(|e| e.contains("between 0 and 15")));
    }

    #[test]
    fn test_validate_config_negative_timeout() {
        let errors =
            validate_config(&json!({"host": "localhost", "port": 6379, "timeout": -1.5}));
        assert!(errors.iter().any(|e| e.contains("non-negative")));
    }

    #[test]
    fn test_validate_config_ok() {
        let errors = validate_config(&json!({
            "host": "localhost", "port": 6379, "database": 3, "timeout": 5.0
        }));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        assert!(RedisDriver::from_config(&json!({"host": "localhost"})).is_err());
        assert!(RedisDriver::from_config(&json!({"host": "localhost", "port": 6379})).is_ok());
    }
}
