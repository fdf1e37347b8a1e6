//! Job entity model and DTOs for the dispatch surface.

use osprey_core::error::CoreError;
use osprey_core::job::JobStatus;
use osprey_core::types::{DbId, Timestamp};
use osprey_core::worker_type::WorkerType;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `jobs` table.
///
/// `worker_type` and `status` are stored as their canonical text names;
/// use [`Job::status`] / [`Job::worker_type`] for the typed views.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    #[sqlx(rename = "worker_type")]
    #[serde(rename = "worker_type")]
    pub worker_type_name: String,
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_name: String,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub submitted_by: Option<DbId>,
    pub attempt_count: i32,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub last_attempt_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Job {
    pub fn status(&self) -> Result<JobStatus, CoreError> {
        self.status_name.parse()
    }

    pub fn worker_type(&self) -> Result<WorkerType, CoreError> {
        self.worker_type_name.parse()
    }
}

/// Default payload: an empty JSON object, never `null`.
fn default_payload() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// DTO for submitting a new job via `POST /api/v1/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJob {
    pub worker_type: String,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    pub priority: Option<i32>,
    /// Caller-supplied request identity; resubmission with the same key
    /// returns the original job instead of creating a duplicate.
    pub idempotency_key: Option<String>,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by status name (e.g. `pending`, `dead_lettered`).
    pub status: Option<String>,
    /// Filter by worker type name.
    pub worker_type: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
