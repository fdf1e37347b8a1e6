//! Admin handlers for schedule definitions.
//!
//! Trigger expressions and worker types are validated at creation time so
//! a bad definition can never reach the beat.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use osprey_core::error::CoreError;
use osprey_core::trigger::Trigger;
use osprey_core::types::DbId;
use osprey_db::models::schedule::CreateSchedule;
use osprey_db::repositories::ScheduleRepo;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/schedules
pub async fn list_schedules(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let schedules = ScheduleRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: schedules }))
}

/// POST /api/v1/schedules
pub async fn create_schedule(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Json(input): Json<CreateSchedule>,
) -> AppResult<impl IntoResponse> {
    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    Trigger::parse(&input.trigger_expr)?;
    state.registry.require_by_name(&input.worker_type)?;

    let schedule = ScheduleRepo::create(&state.pool, &input).await?;

    tracing::info!(
        schedule_id = schedule.id,
        schedule = %schedule.name,
        trigger = %schedule.trigger_expr,
        user_id = admin.user_id,
        "Schedule created",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: schedule })))
}

/// DELETE /api/v1/schedules/{id}
pub async fn delete_schedule(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(schedule_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let deleted = ScheduleRepo::delete(&state.pool, schedule_id).await?;
    if !deleted {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Schedule",
            id: schedule_id,
        }));
    }

    tracing::info!(schedule_id, user_id = admin.user_id, "Schedule deleted");
    Ok(StatusCode::NO_CONTENT)
}
