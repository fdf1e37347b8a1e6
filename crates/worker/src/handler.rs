//! The job handler seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use osprey_broker::Delivery;
use osprey_core::worker_type::WorkerType;

/// Failure reported by a handler.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub message: String,
    /// Retryable failures are requeued while attempts remain;
    /// non-retryable ones fail the job immediately.
    pub retryable: bool,
}

impl HandlerFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// A type-specific job executor.
///
/// Implementations must be safe to run concurrently with themselves up to
/// the type's concurrency limit; any shared state goes through the broker
/// or the central service, never through the handler.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, delivery: &Delivery) -> Result<serde_json::Value, HandlerFailure>;
}

/// Worker-type to handler mapping, built once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<WorkerType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, worker_type: WorkerType, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(worker_type, handler);
        self
    }

    pub fn get(&self, worker_type: WorkerType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&worker_type).cloned()
    }
}
