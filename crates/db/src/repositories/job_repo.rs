//! Repository for the `jobs` table.
//!
//! Status strings always come from `JobStatus::as_str()` — no literals.
//! Transition *policy* (which moves are legal, retry accounting) lives in
//! the dispatcher; every update here carries its precondition in the SQL
//! predicate so a lost race shows up as "no row returned" instead of a
//! silent overwrite.

use osprey_core::job::JobStatus;
use osprey_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::job::{Job, JobListQuery, SubmitJob};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, worker_type, status, priority, payload, idempotency_key, \
    submitted_by, attempt_count, error_message, \
    created_at, last_attempt_at, finished_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Create a new pending job, deduplicating on the idempotency key.
    ///
    /// Returns `(job, created)`. When the key already exists the original
    /// row is returned with `created = false`; the unique constraint makes
    /// this safe under concurrent duplicate submissions.
    pub async fn submit(
        pool: &PgPool,
        submitted_by: Option<DbId>,
        input: &SubmitJob,
    ) -> Result<(Job, bool), sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (worker_type, status, priority, payload, idempotency_key, submitted_by) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (idempotency_key) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Job>(&query)
            .bind(&input.worker_type)
            .bind(JobStatus::Pending.as_str())
            .bind(input.priority.unwrap_or(0))
            .bind(&input.payload)
            .bind(&input.idempotency_key)
            .bind(submitted_by)
            .fetch_optional(pool)
            .await?;

        if let Some(job) = inserted {
            return Ok((job, true));
        }

        // The insert was skipped, so the key must exist. A concurrent
        // deleter does not exist for jobs, so this fetch cannot miss.
        let key = input
            .idempotency_key
            .as_deref()
            .expect("conflict is only possible with an idempotency key");
        let existing = Self::find_by_idempotency_key(pool, key)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok((existing, false))
    }

    /// Insert a pending job inside an open transaction (scheduler path).
    pub async fn insert_tx(
        conn: &mut PgConnection,
        submitted_by: Option<DbId>,
        input: &SubmitJob,
    ) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (worker_type, status, priority, payload, idempotency_key, submitted_by) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&input.worker_type)
            .bind(JobStatus::Pending.as_str())
            .bind(input.priority.unwrap_or(0))
            .bind(&input.payload)
            .bind(&input.idempotency_key)
            .bind(submitted_by)
            .fetch_one(conn)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_idempotency_key(
        pool: &PgPool,
        key: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE idempotency_key = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    /// Mark a delivery attempt as started.
    ///
    /// Valid from `pending` (normal start) and from `in_flight` (a
    /// redelivered message whose previous lease expired). `attempt` is the
    /// 1-based attempt number from the broker delivery; `GREATEST` keeps
    /// the counter monotonic when reports arrive out of order.
    pub async fn mark_in_flight(
        pool: &PgPool,
        id: DbId,
        attempt: i32,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, attempt_count = GREATEST(attempt_count, $3), last_attempt_at = NOW() \
             WHERE id = $1 AND status IN ($4, $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::InFlight.as_str())
            .bind(attempt)
            .bind(JobStatus::Pending.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Terminal success. Only valid from `in_flight`.
    pub async fn complete(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, finished_at = NOW(), error_message = NULL \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Succeeded.as_str())
            .bind(JobStatus::InFlight.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Terminal failure: `failed` (non-retryable) or `dead_lettered`
    /// (retry budget exhausted). Only valid from `in_flight`.
    pub async fn fail(
        pool: &PgPool,
        id: DbId,
        terminal: JobStatus,
        error: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        debug_assert!(matches!(
            terminal,
            JobStatus::Failed | JobStatus::DeadLettered
        ));
        let query = format!(
            "UPDATE jobs \
             SET status = $2, error_message = $3, finished_at = NOW() \
             WHERE id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(terminal.as_str())
            .bind(error)
            .bind(JobStatus::InFlight.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Return a job to `pending` after a retryable failure with attempts
    /// remaining. The failure reason is kept for inspection.
    pub async fn requeue(
        pool: &PgPool,
        id: DbId,
        error: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, error_message = $3 \
             WHERE id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Pending.as_str())
            .bind(error)
            .bind(JobStatus::InFlight.as_str())
            .fetch_optional(pool)
            .await
    }

    /// List jobs with optional status / worker-type filters and pagination.
    /// When `submitted_by` is `Some`, restricts to that submitter's jobs.
    pub async fn list(
        pool: &PgPool,
        submitted_by: Option<DbId>,
        params: &JobListQuery,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if submitted_by.is_some() {
            conditions.push(format!("submitted_by = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.worker_type.is_some() {
            conditions.push(format!("worker_type = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Job>(&query);
        if let Some(uid) = submitted_by {
            q = q.bind(uid);
        }
        if let Some(status) = &params.status {
            q = q.bind(status);
        }
        if let Some(worker_type) = &params.worker_type {
            q = q.bind(worker_type);
        }
        q = q.bind(limit).bind(offset);

        q.fetch_all(pool).await
    }

    /// Number of jobs currently in the given status for a worker type.
    pub async fn count_by_status(
        pool: &PgPool,
        status: JobStatus,
        worker_type: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE status = $1 AND worker_type = $2",
        )
        .bind(status.as_str())
        .bind(worker_type)
        .fetch_one(pool)
        .await
    }
}
