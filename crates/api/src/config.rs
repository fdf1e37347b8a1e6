use std::time::Duration;

use osprey_core::worker_type::{WorkerType, WorkerTypeConfig, WorkerTypeRegistry};

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the secrets have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Shared secret presented by workers and other services in the
    /// `X-API-Key` header.
    pub api_key: String,
    /// JWT token configuration (secret, expiry).
    pub jwt: JwtConfig,
    /// Database pool size (default: `20`).
    pub db_max_connections: u32,
    /// Database connection-acquisition timeout in seconds (default: `5`).
    pub db_acquire_timeout_secs: u64,
    /// Delivery attempts before a job is dead-lettered (default: `3`).
    pub max_attempts: u32,
    /// Broker delivery lease in seconds (default: `120`). Must exceed the
    /// worker execution deadline.
    pub broker_lease_secs: u64,
    /// Change events retained per channel for resume replay (default: `1024`).
    pub replay_window: i64,
    /// Outbound buffer per notification subscriber (default: `256`).
    pub subscriber_buffer: usize,
    /// Scheduler beat interval in seconds (default: `10`).
    pub beat_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Required | Default                 |
    /// |---------------------------|----------|-------------------------|
    /// | `HOST`                    | no       | `0.0.0.0`               |
    /// | `PORT`                    | no       | `3000`                  |
    /// | `CORS_ORIGINS`            | no       | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`    | no       | `30`                    |
    /// | `API_KEY`                 | **yes**  | --                      |
    /// | `JWT_SECRET_KEY`          | **yes**  | --                      |
    /// | `DB_MAX_CONNECTIONS`      | no       | `20`                    |
    /// | `DB_ACQUIRE_TIMEOUT_SECS` | no       | `5`                     |
    /// | `MAX_ATTEMPTS`            | no       | `3`                     |
    /// | `BROKER_LEASE_SECS`       | no       | `120`                   |
    /// | `REPLAY_WINDOW`           | no       | `1024`                  |
    /// | `SUBSCRIBER_BUFFER`       | no       | `256`                   |
    /// | `BEAT_INTERVAL_SECS`      | no       | `10`                    |
    ///
    /// # Panics
    ///
    /// Panics when a required variable is missing or a value fails to
    /// parse -- misconfiguration should fail fast at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = parse_env("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api_key = std::env::var("API_KEY").expect("API_KEY must be set in the environment");
        assert!(!api_key.is_empty(), "API_KEY must not be empty");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 30),
            api_key,
            jwt: JwtConfig::from_env(),
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 20),
            db_acquire_timeout_secs: parse_env("DB_ACQUIRE_TIMEOUT_SECS", 5),
            max_attempts: parse_env("MAX_ATTEMPTS", 3),
            broker_lease_secs: parse_env("BROKER_LEASE_SECS", 120),
            replay_window: parse_env("REPLAY_WINDOW", 1024),
            subscriber_buffer: parse_env("SUBSCRIBER_BUFFER", 256),
            beat_interval_secs: parse_env("BEAT_INTERVAL_SECS", 10),
        }
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    /// Build the worker-type registry from configuration.
    ///
    /// Every known type is registered; `CONCURRENCY_<TYPE>` overrides the
    /// default per-type concurrency limit (e.g. `CONCURRENCY_COLLECTOR=8`).
    pub fn build_registry(&self) -> WorkerTypeRegistry {
        let configs = WorkerType::ALL
            .iter()
            .map(|wt| {
                let var = format!("CONCURRENCY_{}", wt.as_str().to_uppercase());
                let mut config = WorkerTypeConfig::new(*wt);
                if let Some(limit) = std::env::var(&var).ok().and_then(|v| v.parse().ok()) {
                    config = config.with_concurrency(limit);
                }
                config
            })
            .collect();
        WorkerTypeRegistry::new(configs).expect("worker type registry must be valid at startup")
    }
}

/// Read an env var, falling back to `default`, panicking on parse failure.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be valid: {e:?}")),
        Err(_) => default,
    }
}
