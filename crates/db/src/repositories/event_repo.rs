//! Repository for the `change_events` log.
//!
//! Sequence numbers are assigned by the notification hub (single writer);
//! the unique `(channel, seq)` constraint backstops that discipline.

use osprey_core::types::Seq;
use sqlx::PgPool;

use crate::models::event::ChangeEventRow;

/// Column list for `change_events` queries.
const COLUMNS: &str = "id, channel, seq, payload, emitted_at";

pub struct EventRepo;

impl EventRepo {
    /// Append one event. Must happen before fan-out so a subscriber that
    /// resumes immediately afterwards can replay it.
    pub async fn insert(
        pool: &PgPool,
        channel: &str,
        seq: Seq,
        payload: &serde_json::Value,
    ) -> Result<ChangeEventRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO change_events (channel, seq, payload) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ChangeEventRow>(&query)
            .bind(channel)
            .bind(seq)
            .bind(payload)
            .fetch_one(pool)
            .await
    }

    /// Highest sequence assigned on a channel, if any. Seeds the hub's
    /// in-memory counters at startup.
    pub async fn max_seq(pool: &PgPool, channel: &str) -> Result<Option<Seq>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<Seq>>(
            "SELECT MAX(seq) FROM change_events WHERE channel = $1",
        )
        .bind(channel)
        .fetch_one(pool)
        .await
    }

    /// Oldest retained sequence on a channel. Anything older has been
    /// purged and can no longer be replayed.
    pub async fn min_seq(pool: &PgPool, channel: &str) -> Result<Option<Seq>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<Seq>>(
            "SELECT MIN(seq) FROM change_events WHERE channel = $1",
        )
        .bind(channel)
        .fetch_one(pool)
        .await
    }

    /// Events with `seq > after_seq`, in sequence order.
    pub async fn replay_after(
        pool: &PgPool,
        channel: &str,
        after_seq: Seq,
    ) -> Result<Vec<ChangeEventRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM change_events \
             WHERE channel = $1 AND seq > $2 \
             ORDER BY seq"
        );
        sqlx::query_as::<_, ChangeEventRow>(&query)
            .bind(channel)
            .bind(after_seq)
            .fetch_all(pool)
            .await
    }

    /// Drop events outside the replay window: per channel, everything
    /// older than the newest `keep` rows. Returns the number purged.
    pub async fn purge_outside_window(pool: &PgPool, keep: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM change_events ce \
             USING (SELECT channel, MAX(seq) - $1 AS floor \
                    FROM change_events GROUP BY channel) w \
             WHERE ce.channel = w.channel AND ce.seq <= w.floor",
        )
        .bind(keep)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
