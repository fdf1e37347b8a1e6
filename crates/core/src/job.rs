//! Job status state machine and priority constants.
//!
//! Statuses are stored as their lowercase names. The state machine is the
//! single authority on which transitions the result-callback path may
//! apply; terminal states have no outgoing transitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs. Delivered before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background jobs. Delivered last.
pub const PRIORITY_BACKGROUND: i32 = -10;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Durably recorded, awaiting (re)delivery to a worker.
    Pending,
    /// A worker is currently executing the job.
    InFlight,
    /// Terminal: handler completed successfully.
    Succeeded,
    /// Terminal: handler reported a non-retryable failure.
    Failed,
    /// Terminal: retry budget exhausted.
    DeadLettered,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InFlight => "in_flight",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::DeadLettered => "dead_lettered",
        }
    }

    /// Terminal states are immutable; no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::DeadLettered
        )
    }

    /// The set of valid target statuses reachable from `self`.
    ///
    /// `InFlight -> Pending` is the requeue path taken when a retryable
    /// failure still has attempts left.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[JobStatus::InFlight],
            JobStatus::InFlight => &[
                JobStatus::Succeeded,
                JobStatus::Failed,
                JobStatus::DeadLettered,
                JobStatus::Pending,
            ],
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::DeadLettered => &[],
        }
    }

    pub fn can_transition(&self, to: JobStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a transition, returning a descriptive error for invalid ones.
    pub fn validate_transition(&self, to: JobStatus) -> Result<(), CoreError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid job transition: {self} -> {to}"
            )))
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Result reporting
// ---------------------------------------------------------------------------

/// Outcome a worker reports back via `POST /jobs/{id}/result`.
///
/// This is the whole of the write surface workers have over job state;
/// they never touch job records directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResultReport {
    Succeeded,
    Failed {
        message: String,
        /// Non-retryable failures go straight to `Failed` regardless of
        /// remaining attempts.
        retryable: bool,
    },
    /// Deadline exceeded; accounted identically to a retryable failure.
    TimedOut { elapsed_ms: u64 },
}

/// Attempt-start report sent via `POST /jobs/{id}/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartReport {
    /// 1-based delivery attempt number from the broker message.
    pub attempt: i32,
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_flight" => Ok(JobStatus::InFlight),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "dead_lettered" => Ok(JobStatus::DeadLettered),
            other => Err(CoreError::Validation(format!(
                "Unknown job status: {other}"
            ))),
        }
    }
}
