//! Repository for the `schedules` table.
//!
//! The fire path is transactional: the beat locks the row with
//! [`ScheduleRepo::lock`], inserts the job and queue message on the same
//! connection, then calls [`ScheduleRepo::advance`] before commit. The row
//! lock is what makes concurrent beat instances mutually exclusive per
//! schedule.

use osprey_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgPool};

use crate::models::schedule::{CreateSchedule, Schedule};

/// Column list for `schedules` queries.
const COLUMNS: &str = "\
    id, name, trigger_expr, worker_type, payload, priority, enabled, \
    last_fired_at, created_at";

pub struct ScheduleRepo;

impl ScheduleRepo {
    pub async fn create(
        pool: &PgPool,
        input: &CreateSchedule,
    ) -> Result<Schedule, sqlx::Error> {
        let query = format!(
            "INSERT INTO schedules (name, trigger_expr, worker_type, payload, priority, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Schedule>(&query)
            .bind(&input.name)
            .bind(&input.trigger_expr)
            .bind(&input.worker_type)
            .bind(&input.payload)
            .bind(input.priority.unwrap_or(0))
            .bind(input.enabled.unwrap_or(true))
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Schedule>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM schedules WHERE id = $1");
        sqlx::query_as::<_, Schedule>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Schedule>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM schedules ORDER BY name");
        sqlx::query_as::<_, Schedule>(&query).fetch_all(pool).await
    }

    /// Ids of enabled schedules; the beat locks and re-reads each one
    /// inside its own transaction, so only ids are taken here.
    pub async fn enabled_ids(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>("SELECT id FROM schedules WHERE enabled ORDER BY id")
            .fetch_all(pool)
            .await
    }

    /// Delete a schedule. Returns `false` when it did not exist.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lock a schedule row for the duration of the enclosing transaction.
    ///
    /// `SKIP LOCKED` lets a second beat instance move on instead of
    /// queueing behind the holder; the holder will advance
    /// `last_fired_at`, so skipping never loses a tick.
    pub async fn lock(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<Schedule>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM schedules \
             WHERE id = $1 AND enabled \
             FOR UPDATE SKIP LOCKED"
        );
        sqlx::query_as::<_, Schedule>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Record the trigger tick just fired. Must run on the same
    /// connection (transaction) that holds the row lock.
    pub async fn advance(
        conn: &mut PgConnection,
        id: DbId,
        fired_tick: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE schedules SET last_fired_at = $2 WHERE id = $1")
            .bind(id)
            .bind(fired_tick)
            .execute(conn)
            .await?;
        Ok(())
    }
}
