//! Worker process configuration.

use std::time::Duration;

use osprey_core::worker_type::{WorkerType, WorkerTypeConfig};

/// Configuration for one worker pool process, loaded from environment
/// variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the central service (e.g. `http://localhost:3000`).
    pub core_api_url: String,
    /// Shared service key sent in `X-API-Key` on every callback.
    pub api_key: String,
    /// Worker types this process serves, with their concurrency limits
    /// and handler command lines.
    pub types: Vec<ServedType>,
    /// Queue poll interval in seconds (default: `1`).
    pub poll_interval_secs: u64,
    /// Handler execution deadline in seconds (default: `60`).
    pub job_deadline_secs: u64,
    /// Delivery attempts before dead-lettering (default: `3`).
    pub max_attempts: u32,
    /// Broker delivery lease in seconds (default: `120`). Validated to
    /// exceed the execution deadline so a live handler cannot have its
    /// delivery claimed by someone else.
    pub broker_lease_secs: u64,
    /// Database pool size (default: `10`).
    pub db_max_connections: u32,
    /// Database connection-acquisition timeout in seconds (default: `5`).
    pub db_acquire_timeout_secs: u64,
}

/// One worker type served by this process.
#[derive(Debug, Clone)]
pub struct ServedType {
    pub type_config: WorkerTypeConfig,
    /// Command line for the subprocess handler
    /// (`HANDLER_CMD_<TYPE>`, e.g. `HANDLER_CMD_COLLECTOR`).
    pub handler_command: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                   | Required | Default     |
    /// |---------------------------|----------|-------------|
    /// | `CORE_API_URL`            | **yes**  | --          |
    /// | `API_KEY`                 | **yes**  | --          |
    /// | `WORKER_TYPES`            | no       | `collector` |
    /// | `CONCURRENCY_<TYPE>`      | no       | `4`         |
    /// | `HANDLER_CMD_<TYPE>`      | **yes**  | --          |
    /// | `POLL_INTERVAL_SECS`      | no       | `1`         |
    /// | `JOB_DEADLINE_SECS`       | no       | `60`        |
    /// | `MAX_ATTEMPTS`            | no       | `3`         |
    /// | `BROKER_LEASE_SECS`       | no       | `120`       |
    /// | `DB_MAX_CONNECTIONS`      | no       | `10`        |
    /// | `DB_ACQUIRE_TIMEOUT_SECS` | no       | `5`         |
    ///
    /// # Panics
    ///
    /// Panics on missing required variables, unknown worker type names,
    /// or a lease that does not exceed the execution deadline --
    /// misconfiguration should fail fast at startup.
    pub fn from_env() -> Self {
        let core_api_url =
            std::env::var("CORE_API_URL").expect("CORE_API_URL must be set in the environment");
        let api_key = std::env::var("API_KEY").expect("API_KEY must be set in the environment");
        assert!(!api_key.is_empty(), "API_KEY must not be empty");

        let type_names = std::env::var("WORKER_TYPES").unwrap_or_else(|_| "collector".into());
        let types: Vec<ServedType> = type_names
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|name| {
                let worker_type: WorkerType = name
                    .parse()
                    .unwrap_or_else(|e| panic!("WORKER_TYPES entry invalid: {e}"));
                let upper = worker_type.as_str().to_uppercase();

                let mut type_config = WorkerTypeConfig::new(worker_type);
                if let Some(limit) = std::env::var(format!("CONCURRENCY_{upper}"))
                    .ok()
                    .and_then(|v| v.parse().ok())
                {
                    type_config = type_config.with_concurrency(limit);
                }

                let handler_command = std::env::var(format!("HANDLER_CMD_{upper}"))
                    .unwrap_or_else(|_| panic!("HANDLER_CMD_{upper} must be set"));

                ServedType {
                    type_config,
                    handler_command,
                }
            })
            .collect();
        assert!(!types.is_empty(), "WORKER_TYPES must name at least one type");

        let job_deadline_secs = parse_env("JOB_DEADLINE_SECS", 60);
        let broker_lease_secs = parse_env("BROKER_LEASE_SECS", 120);
        assert!(
            broker_lease_secs > job_deadline_secs,
            "BROKER_LEASE_SECS ({broker_lease_secs}) must exceed JOB_DEADLINE_SECS ({job_deadline_secs})",
        );

        Self {
            core_api_url,
            api_key,
            types,
            poll_interval_secs: parse_env("POLL_INTERVAL_SECS", 1),
            job_deadline_secs,
            max_attempts: parse_env("MAX_ATTEMPTS", 3),
            broker_lease_secs,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 10),
            db_acquire_timeout_secs: parse_env("DB_ACQUIRE_TIMEOUT_SECS", 5),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }

    pub fn broker_lease(&self) -> Duration {
        Duration::from_secs(self.broker_lease_secs)
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
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
