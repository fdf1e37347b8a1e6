//! Route definitions for the `/schedules` resource (admin only).

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::schedules;
use crate::state::AppState;

/// Routes mounted at `/schedules`.
///
/// ```text
/// GET    /        -> list_schedules
/// POST   /        -> create_schedule
/// DELETE /{id}    -> delete_schedule
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(schedules::list_schedules).post(schedules::create_schedule),
        )
        .route("/{id}", delete(schedules::delete_schedule))
}
