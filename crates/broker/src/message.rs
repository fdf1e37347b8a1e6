//! Queue message envelope.

use osprey_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A claimed queue message, valid until its lease expires.
///
/// Carries the headers every delivery has: the job id, the attempt
/// counter, and the original enqueue time. `attempt` counts *completed*
/// delivery attempts, so it is `0` on first delivery.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Delivery {
    #[sqlx(rename = "id")]
    pub message_id: DbId,
    pub queue: String,
    pub job_id: DbId,
    pub attempt: i32,
    pub payload: serde_json::Value,
    pub enqueued_at: Timestamp,
}

impl Delivery {
    /// 1-based attempt number of the execution about to run.
    pub fn attempt_number(&self) -> i32 {
        self.attempt + 1
    }
}
