use std::sync::Arc;

use osprey_broker::{Broker, BrokerConfig};
use osprey_worker::config::WorkerConfig;
use osprey_worker::handler::HandlerRegistry;
use osprey_worker::handlers::command::CommandHandler;
use osprey_worker::report::CoreClient;
use osprey_worker::runtime::{PoolRuntime, RuntimeConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "osprey_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        core_api_url = %config.core_api_url,
        worker_types = config.types.len(),
        deadline_secs = config.job_deadline_secs,
        "Starting osprey-worker",
    );

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = osprey_db::create_pool(
        &database_url,
        config.db_max_connections,
        config.db_acquire_timeout(),
    )
    .await
    .expect("Failed to connect to database");

    let broker = Broker::new(
        pool,
        BrokerConfig {
            lease: config.broker_lease(),
            ..BrokerConfig::default()
        },
    );

    let mut handlers = HandlerRegistry::new();
    for served in &config.types {
        let handler = CommandHandler::from_command_line(&served.handler_command)
            .unwrap_or_else(|e| panic!("Invalid handler command: {e}"));
        handlers = handlers.register(served.type_config.worker_type, Arc::new(handler));
        tracing::info!(
            worker_type = %served.type_config.worker_type,
            concurrency_limit = served.type_config.concurrency_limit,
            "Handler registered",
        );
    }

    let sink = Arc::new(CoreClient::new(
        config.core_api_url.clone(),
        config.api_key.clone(),
    ));

    let runtime = Arc::new(PoolRuntime::new(
        broker,
        handlers,
        sink,
        config.types.iter().map(|t| t.type_config.clone()).collect(),
        RuntimeConfig {
            poll_interval: config.poll_interval(),
            deadline: config.job_deadline(),
            max_attempts: config.max_attempts,
            requeue_backoff: Default::default(),
        },
    ));

    let cancel = tokio_util::sync::CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    runtime.run(cancel).await;
    tracing::info!("Worker shut down");
}

/// Wait for SIGINT or SIGTERM.
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
            tracing::info!("Received SIGINT, draining in-flight jobs");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, draining in-flight jobs");
        }
    }
}
