use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use osprey_broker::{Broker, BrokerConfig};
use osprey_notify::{NotifyHub, NotifyHubConfig};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use osprey_api::background::beat::Beat;
use osprey_api::config::ServerConfig;
use osprey_api::dispatch::Dispatcher;
use osprey_api::routes;
use osprey_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "osprey_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let registry = Arc::new(config.build_registry());
    tracing::info!(worker_types = registry.len(), "Worker type registry validated");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = osprey_db::create_pool(
        &database_url,
        config.db_max_connections,
        config.db_acquire_timeout(),
    )
    .await
    .expect("Failed to connect to database");
    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connection pool created",
    );

    osprey_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    osprey_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Broker ---
    let broker = Broker::new(
        pool.clone(),
        BrokerConfig {
            lease: Duration::from_secs(config.broker_lease_secs),
            ..BrokerConfig::default()
        },
    );

    // --- Notification hub ---
    let hub = Arc::new(NotifyHub::new(
        pool.clone(),
        NotifyHubConfig {
            subscriber_buffer: config.subscriber_buffer,
            replay_window: config.replay_window,
        },
    ));

    // --- Dispatcher ---
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        broker.clone(),
        Arc::clone(&registry),
        Arc::clone(&hub),
        config.max_attempts,
    ));

    // --- Background tasks ---
    let cancel = tokio_util::sync::CancellationToken::new();

    let beat = Beat::new(
        pool.clone(),
        Arc::clone(&registry),
        Arc::clone(&hub),
        Duration::from_secs(config.beat_interval_secs),
    );
    let beat_cancel = cancel.clone();
    let beat_handle = tokio::spawn(async move {
        beat.run(beat_cancel).await;
    });

    let reaper_broker = broker.clone();
    let reaper_cancel = cancel.clone();
    let reaper_handle = tokio::spawn(async move {
        reaper_broker.run_reaper(reaper_cancel).await;
    });

    let retention_pool = pool.clone();
    let retention_window = config.replay_window;
    let retention_cancel = cancel.clone();
    let retention_handle = tokio::spawn(async move {
        osprey_notify::retention::run(retention_pool, retention_window, retention_cancel).await;
    });

    tracing::info!("Background services started (beat, lease reaper, event retention)");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        registry,
        dispatcher,
        hub: Arc::clone(&hub),
    };

    // --- CORS ---
    let cors = build_cors_layer(&config);

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(routes::health::router())
        // API v1 routes.
        .nest("/api/v1", routes::api_routes())
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), beat_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Background services stopped");

    let subscribers = hub.subscriber_count().await;
    tracing::info!(subscribers, "Closing remaining event subscriptions");
    hub.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid -- we want
/// misconfiguration to fail fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
