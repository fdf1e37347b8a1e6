//! Lease-based queue operations.

use std::time::Duration;

use osprey_core::backoff::BackoffPolicy;
use osprey_core::error::CoreError;
use osprey_core::types::DbId;
use sqlx::{PgConnection, PgPool};
use tokio_util::sync::CancellationToken;

use crate::message::Delivery;

/// Columns returned for claimed deliveries.
const DELIVERY_COLUMNS: &str = "id, queue, job_id, attempt, payload, enqueued_at";

/// Broker tuning knobs.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a claimed message stays invisible before it is considered
    /// abandoned and becomes claimable again. Must exceed the worker's
    /// job execution deadline.
    pub lease: Duration,
    /// Retry policy for publish attempts against an unreachable database.
    pub publish_retry: BackoffPolicy,
    /// Publish attempts before `DispatchUnavailable` is surfaced.
    pub max_publish_attempts: u32,
    /// How often the reaper logs expired-lease reclaims.
    pub reap_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(120),
            publish_retry: BackoffPolicy::default(),
            max_publish_attempts: 5,
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Durable queue client shared by the dispatcher and worker runtimes.
#[derive(Clone)]
pub struct Broker {
    pool: PgPool,
    config: BrokerConfig,
}

impl Broker {
    pub fn new(pool: PgPool, config: BrokerConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Append a message to `queue`, retrying transient failures with
    /// bounded backoff. Exhausting the budget surfaces
    /// [`CoreError::DispatchUnavailable`].
    pub async fn publish(
        &self,
        queue: &str,
        job_id: DbId,
        priority: i32,
        payload: &serde_json::Value,
    ) -> Result<DbId, CoreError> {
        let mut last_error = None;

        for attempt in 0..self.config.max_publish_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.publish_retry.delay_for(attempt - 1)).await;
            }

            match self.insert_message(queue, job_id, priority, payload).await {
                Ok(message_id) => {
                    tracing::debug!(queue, job_id, message_id, "Message published");
                    return Ok(message_id);
                }
                Err(e) => {
                    tracing::warn!(
                        queue,
                        job_id,
                        attempt,
                        error = %e,
                        "Publish attempt failed",
                    );
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Err(CoreError::DispatchUnavailable(format!(
            "publish to '{queue}' failed after {} attempts: {reason}",
            self.config.max_publish_attempts,
        )))
    }

    async fn insert_message(
        &self,
        queue: &str,
        job_id: DbId,
        priority: i32,
        payload: &serde_json::Value,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO queue_messages (queue, job_id, priority, payload) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(queue)
        .bind(job_id)
        .bind(priority)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
    }

    /// Append a message inside an open transaction (scheduler fire path:
    /// job row, queue message, and `last_fired_at` commit atomically).
    pub async fn enqueue_tx(
        conn: &mut PgConnection,
        queue: &str,
        job_id: DbId,
        priority: i32,
        payload: &serde_json::Value,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO queue_messages (queue, job_id, priority, payload) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(queue)
        .bind(job_id)
        .bind(priority)
        .bind(payload)
        .fetch_one(conn)
        .await
    }

    /// Whether a live (non-dead-lettered) message exists for a job.
    ///
    /// Used by the dispatcher to re-publish on idempotent resubmission of
    /// a job whose original publish failed mid-way.
    pub async fn has_live_message(&self, job_id: DbId) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_messages \
             WHERE job_id = $1 AND NOT dead_lettered",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Claim up to `credit` due messages from `queue` and lease them.
    ///
    /// The predicate admits both never-claimed messages and ones whose
    /// lease has expired, so redelivery needs no separate sweep.
    /// `SKIP LOCKED` keeps concurrent claimers from double-dispatching.
    pub async fn claim(&self, queue: &str, credit: u32) -> Result<Vec<Delivery>, sqlx::Error> {
        if credit == 0 {
            return Ok(Vec::new());
        }

        let query = format!(
            "UPDATE queue_messages \
             SET lease_expires_at = NOW() + make_interval(secs => $3) \
             WHERE id IN ( \
                 SELECT id FROM queue_messages \
                 WHERE queue = $1 \
                   AND NOT dead_lettered \
                   AND visible_at <= NOW() \
                   AND (lease_expires_at IS NULL OR lease_expires_at <= NOW()) \
                 ORDER BY priority DESC, enqueued_at ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {DELIVERY_COLUMNS}"
        );
        sqlx::query_as::<_, Delivery>(&query)
            .bind(queue)
            .bind(credit as i64)
            .bind(self.config.lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await
    }

    /// Acknowledge a delivery: the message is removed permanently.
    pub async fn ack(&self, message_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Negative-acknowledge with requeue: the attempt counter is bumped
    /// and the message becomes visible again after `delay`.
    pub async fn nack_requeue(
        &self,
        message_id: DbId,
        delay: Duration,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE queue_messages \
             SET attempt = attempt + 1, \
                 visible_at = NOW() + make_interval(secs => $2), \
                 lease_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Negative-acknowledge into the dead-letter path. The row stays for
    /// inspection but is never claimed again.
    pub async fn nack_dead_letter(&self, message_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE queue_messages \
             SET dead_lettered = TRUE, \
                 attempt = attempt + 1, \
                 lease_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of live messages waiting or leased on a queue.
    pub async fn depth(&self, queue: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_messages \
             WHERE queue = $1 AND NOT dead_lettered",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await
    }

    /// Clear expired leases so the affected messages show up in claim
    /// scans immediately. Claiming already tolerates expired leases; this
    /// keeps the table tidy and gives redeliveries a log line.
    pub async fn reclaim_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE queue_messages \
             SET lease_expires_at = NULL \
             WHERE lease_expires_at IS NOT NULL \
               AND lease_expires_at <= NOW() \
               AND NOT dead_lettered",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Run the lease reaper until cancelled.
    pub async fn run_reaper(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.reap_interval);
        tracing::info!(
            interval_secs = self.config.reap_interval.as_secs(),
            "Broker lease reaper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Broker lease reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.reclaim_expired().await {
                        Ok(0) => {}
                        Ok(reclaimed) => {
                            tracing::warn!(reclaimed, "Expired leases returned for redelivery");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Lease reclaim failed");
                        }
                    }
                }
            }
        }
    }
}
