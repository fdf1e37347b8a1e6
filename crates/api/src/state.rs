use std::sync::Arc;

use osprey_core::worker_type::WorkerTypeRegistry;
use osprey_notify::NotifyHub;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`. Cheaply cloneable; inner data is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: osprey_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Startup-validated worker type registry.
    pub registry: Arc<WorkerTypeRegistry>,
    /// Job submission / result application service.
    pub dispatcher: Arc<Dispatcher>,
    /// Notification hub for change-event fan-out.
    pub hub: Arc<NotifyHub>,
}
