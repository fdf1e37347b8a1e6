//! Worker type enum and the runtime registry built from configuration.
//!
//! Worker types are a closed enum rather than open string dispatch so an
//! unregistered type is caught at submission time, not at delivery time.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default concurrency limit applied when configuration does not override it.
pub const DEFAULT_CONCURRENCY_LIMIT: u32 = 4;

/// Upper bound accepted for a per-type concurrency limit.
const MAX_CONCURRENCY_LIMIT: u32 = 256;

/// The closed set of job handler categories.
///
/// Each type has its own durable queue binding and concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    /// Pulls content from external sources.
    Collector,
    /// Post-processes collected content (enrichment, tagging).
    Bot,
    /// Renders stored content into deliverable documents.
    Presenter,
    /// Pushes rendered products to external destinations.
    Publisher,
}

impl WorkerType {
    /// Every known worker type, in dispatch-documentation order.
    pub const ALL: [WorkerType; 4] = [
        WorkerType::Collector,
        WorkerType::Bot,
        WorkerType::Presenter,
        WorkerType::Publisher,
    ];

    /// Canonical lowercase name used in configuration, the database, and
    /// the HTTP surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Collector => "collector",
            WorkerType::Bot => "bot",
            WorkerType::Presenter => "presenter",
            WorkerType::Publisher => "publisher",
        }
    }

    /// Name of the durable queue bound to this worker type.
    pub fn queue(&self) -> &'static str {
        match self {
            WorkerType::Collector => "jobs.collector",
            WorkerType::Bot => "jobs.bot",
            WorkerType::Presenter => "jobs.presenter",
            WorkerType::Publisher => "jobs.publisher",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collector" => Ok(WorkerType::Collector),
            "bot" => Ok(WorkerType::Bot),
            "presenter" => Ok(WorkerType::Presenter),
            "publisher" => Ok(WorkerType::Publisher),
            other => Err(CoreError::InvalidWorkerType(other.to_string())),
        }
    }
}

/// Registration record for one worker type.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerTypeConfig {
    pub worker_type: WorkerType,
    /// Maximum simultaneous in-flight jobs a pool serving this type may hold.
    pub concurrency_limit: u32,
    /// Queue binding; derived from the type unless configuration overrides it.
    pub queue: String,
}

impl WorkerTypeConfig {
    /// Registration with the default queue binding and concurrency limit.
    pub fn new(worker_type: WorkerType) -> Self {
        Self {
            worker_type,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            queue: worker_type.queue().to_string(),
        }
    }

    pub fn with_concurrency(mut self, limit: u32) -> Self {
        self.concurrency_limit = limit;
        self
    }
}

/// Startup-validated, read-only map of registered worker types.
///
/// Built once from configuration and injected where needed; never mutated
/// at runtime.
#[derive(Debug, Clone)]
pub struct WorkerTypeRegistry {
    entries: HashMap<WorkerType, WorkerTypeConfig>,
}

impl WorkerTypeRegistry {
    /// Build a registry, rejecting duplicate registrations and
    /// out-of-range concurrency limits.
    pub fn new(configs: Vec<WorkerTypeConfig>) -> Result<Self, CoreError> {
        if configs.is_empty() {
            return Err(CoreError::Validation(
                "At least one worker type must be registered".to_string(),
            ));
        }

        let mut entries = HashMap::with_capacity(configs.len());
        for config in configs {
            if config.concurrency_limit == 0 || config.concurrency_limit > MAX_CONCURRENCY_LIMIT {
                return Err(CoreError::Validation(format!(
                    "Concurrency limit for {} must be in 1..={MAX_CONCURRENCY_LIMIT}",
                    config.worker_type,
                )));
            }
            if entries.insert(config.worker_type, config).is_some() {
                return Err(CoreError::Validation(
                    "Duplicate worker type registration".to_string(),
                ));
            }
        }

        Ok(Self { entries })
    }

    /// Registry containing every known type with default limits.
    pub fn all_defaults() -> Self {
        Self::new(WorkerType::ALL.map(WorkerTypeConfig::new).to_vec())
            .expect("default registry is always valid")
    }

    pub fn get(&self, worker_type: WorkerType) -> Option<&WorkerTypeConfig> {
        self.entries.get(&worker_type)
    }

    /// Look up a registration, failing with `InvalidWorkerType` when absent.
    pub fn require(&self, worker_type: WorkerType) -> Result<&WorkerTypeConfig, CoreError> {
        self.entries
            .get(&worker_type)
            .ok_or_else(|| CoreError::InvalidWorkerType(worker_type.to_string()))
    }

    /// Parse and validate a worker type name in one step.
    pub fn require_by_name(&self, name: &str) -> Result<&WorkerTypeConfig, CoreError> {
        let worker_type = name.parse::<WorkerType>()?;
        self.require(worker_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &WorkerTypeConfig> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
