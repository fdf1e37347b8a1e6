pub mod health;
pub mod jobs;
pub mod schedules;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                     list (GET), submit (POST)
/// /jobs/{id}                get
/// /jobs/{id}/start          worker attempt-start callback (POST, service key)
/// /jobs/{id}/result         worker result callback (POST, service key)
///
/// /schedules                list, create (admin only)
/// /schedules/{id}           delete (admin only)
///
/// /events/subscribe         WebSocket upgrade (JWT; resume via
///                           Last-Event-ID header or ?resume_from=)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/schedules", schedules::router())
        .route("/events/subscribe", get(ws::events_subscribe))
}
