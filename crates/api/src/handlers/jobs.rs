//! Handlers for the `/jobs` resource.
//!
//! Submission accepts user tokens and the service key; the start/result
//! callbacks are service-key only -- they are the narrow interface workers
//! have instead of touching job records directly.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use osprey_core::error::CoreError;
use osprey_core::job::{JobResultReport, JobStartReport};
use osprey_core::types::DbId;
use osprey_db::models::job::{Job, JobListQuery, SubmitJob};
use osprey_db::repositories::JobRepo;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AuthUser, Caller, ServiceAuth};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job by ID and verify the caller owns it (or is admin).
async fn find_and_authorize(
    pool: &sqlx::PgPool,
    job_id: DbId,
    auth: &AuthUser,
) -> AppResult<Job> {
    let job = JobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        }))?;

    if job.submitted_by != Some(auth.user_id) && !auth.is_admin() {
        return Err(AppError::Core(CoreError::Forbidden(
            "Cannot view another user's job".into(),
        )));
    }

    Ok(job)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a new job. Returns 201 with the created job, or 200 with the
/// original job when the idempotency key was already used.
pub async fn submit_job(
    caller: Caller,
    State(state): State<AppState>,
    Json(input): Json<SubmitJob>,
) -> AppResult<impl IntoResponse> {
    let (job, created) = state.dispatcher.submit(caller.user_id(), &input).await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// List / Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// List jobs. Admin users see all jobs; regular users see only their own.
/// Supports `status`, `worker_type`, `limit`, and `offset` query params --
/// dead-lettered jobs are inspectable via `?status=dead_lettered`.
pub async fn list_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let submitted_by = if auth.is_admin() {
        None
    } else {
        Some(auth.user_id)
    };
    let jobs = JobRepo::list(&state.pool, submitted_by, &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state.pool, job_id, &auth).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Worker callbacks
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/start
///
/// Worker reports that a delivery attempt began executing. Service key only.
pub async fn start_job(
    _service: ServiceAuth,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(report): Json<JobStartReport>,
) -> AppResult<impl IntoResponse> {
    if report.attempt < 1 {
        return Err(AppError::BadRequest("attempt must be >= 1".into()));
    }
    let job = state.dispatcher.mark_started(job_id, report.attempt).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/result
///
/// Worker reports the outcome of a delivery attempt. Service key only.
/// Duplicate reports for a terminal job are answered idempotently.
pub async fn report_result(
    _service: ServiceAuth,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(report): Json<JobResultReport>,
) -> AppResult<impl IntoResponse> {
    let job = state.dispatcher.report_result(job_id, &report).await?;
    Ok(Json(DataResponse { data: job }))
}
