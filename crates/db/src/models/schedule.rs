//! Schedule entity model and DTOs.

use osprey_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `schedules` table.
///
/// `last_fired_at` records the trigger tick of the most recent fire, not
/// wall-clock fire time; the beat compares trigger ticks against it so a
/// restart never re-fires an already-completed window.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Schedule {
    pub id: DbId,
    pub name: String,
    pub trigger_expr: String,
    #[sqlx(rename = "worker_type")]
    #[serde(rename = "worker_type")]
    pub worker_type_name: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub enabled: bool,
    pub last_fired_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// Default payload: an empty JSON object, never `null`.
fn default_payload() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// DTO for creating a schedule via `POST /api/v1/schedules`.
#[derive(Debug, Deserialize)]
pub struct CreateSchedule {
    pub name: String,
    pub trigger_expr: String,
    pub worker_type: String,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
}
