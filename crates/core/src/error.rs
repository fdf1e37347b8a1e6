use crate::types::{DbId, Seq};

/// Domain error taxonomy shared by every Osprey crate.
///
/// The API layer maps these onto HTTP statuses; the worker runtime maps
/// handler failures onto the `JobExecutionFailed` / `JobTimeout` variants
/// before reporting them back to the central service.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Submission named a worker type with no registry entry.
    #[error("Unknown worker type: {0}")]
    InvalidWorkerType(String),

    /// The broker rejected a publish after the bounded retry budget.
    #[error("Dispatch unavailable: {0}")]
    DispatchUnavailable(String),

    /// A job handler reported failure. `retryable` decides whether the
    /// delivery is requeued or the job goes straight to `Failed`.
    #[error("Job {job_id} execution failed: {message}")]
    JobExecutionFailed {
        job_id: DbId,
        message: String,
        retryable: bool,
    },

    /// A handler exceeded its execution deadline. Treated identically to
    /// a retryable execution failure for attempt accounting.
    #[error("Job {job_id} timed out after {elapsed_ms}ms")]
    JobTimeout { job_id: DbId, elapsed_ms: u64 },

    /// A resume request asked for a sequence older than the retained
    /// replay window; the subscriber must resynchronize with a full fetch.
    #[error("Replay window exceeded on channel {channel}: requested {requested}, oldest retained {oldest}")]
    ResumeGap {
        channel: String,
        requested: Seq,
        oldest: Seq,
    },

    /// A bounded pool or connection limit was hit; callers should back
    /// off and retry rather than block.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
