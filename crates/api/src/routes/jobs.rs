//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /               -> list_jobs
/// POST   /               -> submit_job
/// GET    /{id}           -> get_job
/// POST   /{id}/start     -> start_job      (service key)
/// POST   /{id}/result    -> report_result  (service key)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/start", post(jobs::start_job))
        .route("/{id}/result", post(jobs::report_result))
}
