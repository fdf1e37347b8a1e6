//! Shared test harness: builds the full application router with the same
//! middleware stack as `main.rs` so integration tests exercise what
//! production runs.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use osprey_api::auth::jwt::{generate_access_token, JwtConfig};
use osprey_api::config::ServerConfig;
use osprey_api::dispatch::Dispatcher;
use osprey_api::routes;
use osprey_api::state::AppState;
use osprey_broker::{Broker, BrokerConfig};
use osprey_core::types::DbId;
use osprey_core::worker_type::WorkerTypeRegistry;
use osprey_notify::{NotifyHub, NotifyHubConfig};

/// Service key used by every test.
pub const TEST_API_KEY: &str = "test-service-key";

/// Low attempt budget so dead-letter paths are quick to exercise.
pub const TEST_MAX_ATTEMPTS: u32 = 3;

/// Build a test `ServerConfig` with fixed secrets and safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        api_key: TEST_API_KEY.to_string(),
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 60,
        },
        db_max_connections: 5,
        db_acquire_timeout_secs: 5,
        max_attempts: TEST_MAX_ATTEMPTS,
        broker_lease_secs: 120,
        replay_window: 1024,
        subscriber_buffer: 256,
        beat_interval_secs: 10,
    }
}

/// Build the shared state exactly as `main.rs` wires it.
pub fn build_test_state(pool: PgPool) -> AppState {
    let config = test_config();
    let registry = Arc::new(WorkerTypeRegistry::all_defaults());
    let broker = Broker::new(pool.clone(), BrokerConfig::default());
    let hub = Arc::new(NotifyHub::new(
        pool.clone(),
        NotifyHubConfig {
            subscriber_buffer: config.subscriber_buffer,
            replay_window: config.replay_window,
        },
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        broker,
        Arc::clone(&registry),
        Arc::clone(&hub),
        config.max_attempts,
    ));

    AppState {
        pool,
        config: Arc::new(config),
        registry,
        dispatcher,
        hub,
    }
}

/// Build the full application router over the given state.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

/// Convenience: state + router in one step.
pub fn build_test_app(pool: PgPool) -> Router {
    build_app(build_test_state(pool))
}

/// A bearer token for a regular user.
pub fn user_token(user_id: DbId) -> String {
    generate_access_token(user_id, "user", &test_config().jwt)
        .expect("token generation should succeed")
}

/// A bearer token for an admin.
pub fn admin_token(user_id: DbId) -> String {
    generate_access_token(user_id, "admin", &test_config().jwt)
        .expect("token generation should succeed")
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub enum Auth<'a> {
    None,
    Bearer(&'a str),
    ApiKey,
}

/// Send a request through the router with optional auth and JSON body.
pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    auth: Auth<'_>,
    body: Option<serde_json::Value>,
) -> Response<axum::body::Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    match auth {
        Auth::None => {}
        Auth::Bearer(token) => {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        Auth::ApiKey => {
            builder = builder.header("x-api-key", TEST_API_KEY);
        }
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str, auth: Auth<'_>) -> Response<axum::body::Body> {
    send(app, Method::GET, uri, auth, None).await
}

pub async fn post(
    app: Router,
    uri: &str,
    auth: Auth<'_>,
    body: serde_json::Value,
) -> Response<axum::body::Body> {
    send(app, Method::POST, uri, auth, Some(body)).await
}

/// Collect and parse a response body as JSON.
pub async fn body_json(response: Response<axum::body::Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
