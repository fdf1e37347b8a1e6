//! The dispatcher: validates submissions against the worker-type registry,
//! creates the durable job record, and hands the job to the broker queue
//! bound to its type. Also the single write path for worker result
//! callbacks.

use std::sync::Arc;

use osprey_broker::Broker;
use osprey_core::error::CoreError;
use osprey_core::job::{JobResultReport, JobStatus};
use osprey_core::types::DbId;
use osprey_core::worker_type::WorkerTypeRegistry;
use osprey_db::models::job::{Job, SubmitJob};
use osprey_db::repositories::JobRepo;
use osprey_db::DbPool;
use osprey_notify::event::CHANNEL_JOBS;
use osprey_notify::NotifyHub;

use crate::error::{AppError, AppResult};

pub struct Dispatcher {
    pool: DbPool,
    broker: Broker,
    registry: Arc<WorkerTypeRegistry>,
    hub: Arc<NotifyHub>,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(
        pool: DbPool,
        broker: Broker,
        registry: Arc<WorkerTypeRegistry>,
        hub: Arc<NotifyHub>,
        max_attempts: u32,
    ) -> Self {
        Self {
            pool,
            broker,
            registry,
            hub,
            max_attempts,
        }
    }

    /// Submit a job.
    ///
    /// The job row is durably `pending` before the broker publish and
    /// before the caller is acknowledged; the row, not the queue, is the
    /// source of truth for the job's existence. Resubmission with the same
    /// idempotency key returns the original job -- and re-publishes its
    /// queue message if the original handoff died between the insert and
    /// the publish, which is what makes retrying a `DispatchUnavailable`
    /// submission safe.
    pub async fn submit(
        &self,
        submitted_by: Option<DbId>,
        input: &SubmitJob,
    ) -> AppResult<(Job, bool)> {
        let type_config = self.registry.require_by_name(&input.worker_type)?;

        let (job, created) = JobRepo::submit(&self.pool, submitted_by, input).await?;

        if created {
            self.broker
                .publish(&type_config.queue, job.id, job.priority, &job.payload)
                .await?;
            self.publish_job_event(&job).await;
            tracing::info!(
                job_id = job.id,
                worker_type = %job.worker_type_name,
                queue = %type_config.queue,
                "Job submitted",
            );
        } else {
            tracing::info!(
                job_id = job.id,
                idempotency_key = input.idempotency_key.as_deref().unwrap_or(""),
                "Duplicate submission resolved to existing job",
            );
            // Heal a half-finished handoff: pending job, no live message.
            if job.status()? == JobStatus::Pending
                && !self.broker.has_live_message(job.id).await?
            {
                self.broker
                    .publish(&type_config.queue, job.id, job.priority, &job.payload)
                    .await?;
                tracing::warn!(job_id = job.id, "Re-published job with no live queue message");
            }
        }

        Ok((job, created))
    }

    /// Record that a worker began a delivery attempt.
    ///
    /// `attempt` is the 1-based attempt number from the broker delivery.
    pub async fn mark_started(&self, job_id: DbId, attempt: i32) -> AppResult<Job> {
        let job = JobRepo::mark_in_flight(&self.pool, job_id, attempt)
            .await?
            .ok_or_else(|| {
                AppError::Core(CoreError::Conflict(format!(
                    "Job {job_id} is not startable (missing or terminal)"
                )))
            })?;

        self.publish_job_event(&job).await;
        Ok(job)
    }

    /// Apply a worker-reported outcome.
    ///
    /// Transitions run through the job state machine; a duplicate callback
    /// for an already-terminal job is answered idempotently with the
    /// current row (redeliveries make duplicates a normal occurrence).
    pub async fn report_result(&self, job_id: DbId, report: &JobResultReport) -> AppResult<Job> {
        let job = JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or(AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id,
            }))?;

        let status = job.status()?;
        if status.is_terminal() {
            tracing::debug!(job_id, status = %status, "Duplicate result for terminal job");
            return Ok(job);
        }

        // A lost start report leaves the job pending; apply the implicit
        // start so the terminal transition stays within the state machine.
        let job = if status == JobStatus::Pending {
            status.validate_transition(JobStatus::InFlight)?;
            JobRepo::mark_in_flight(&self.pool, job_id, job.attempt_count.max(1))
                .await?
                .ok_or_else(|| concurrent_change(job_id))?
        } else {
            job
        };

        let updated = match report {
            JobResultReport::Succeeded => {
                JobStatus::InFlight.validate_transition(JobStatus::Succeeded)?;
                JobRepo::complete(&self.pool, job_id)
                    .await?
                    .ok_or_else(|| concurrent_change(job_id))?
            }
            JobResultReport::Failed { message, retryable } => {
                self.apply_failure(&job, message, *retryable).await?
            }
            JobResultReport::TimedOut { elapsed_ms } => {
                let message = format!("execution deadline exceeded after {elapsed_ms}ms");
                self.apply_failure(&job, &message, true).await?
            }
        };

        tracing::info!(
            job_id,
            status = %updated.status_name,
            attempt_count = updated.attempt_count,
            "Job result applied",
        );
        self.publish_job_event(&updated).await;
        Ok(updated)
    }

    /// Failure policy: non-retryable fails terminally; a retryable failure
    /// dead-letters once the attempt budget is spent, otherwise the job
    /// returns to `pending` to await its redelivery.
    async fn apply_failure(&self, job: &Job, message: &str, retryable: bool) -> AppResult<Job> {
        let terminal = if !retryable {
            Some(JobStatus::Failed)
        } else if job.attempt_count >= self.max_attempts as i32 {
            Some(JobStatus::DeadLettered)
        } else {
            None
        };

        let updated = match terminal {
            Some(target) => {
                JobStatus::InFlight.validate_transition(target)?;
                JobRepo::fail(&self.pool, job.id, target, message).await?
            }
            None => {
                JobStatus::InFlight.validate_transition(JobStatus::Pending)?;
                JobRepo::requeue(&self.pool, job.id, message).await?
            }
        };

        updated.ok_or_else(|| concurrent_change(job.id))
    }

    /// Emit a `jobs` channel change event for the row's current state.
    ///
    /// Event publication is best-effort relative to the job mutation: the
    /// row is already committed, and a failed append is logged rather than
    /// unwinding the callback.
    async fn publish_job_event(&self, job: &Job) {
        let payload = serde_json::json!({
            "job_id": job.id,
            "worker_type": job.worker_type_name,
            "status": job.status_name,
            "attempt_count": job.attempt_count,
        });
        if let Err(e) = self.hub.publish(CHANNEL_JOBS, payload).await {
            tracing::error!(job_id = job.id, error = %e, "Failed to publish job change event");
        }
    }
}

fn concurrent_change(job_id: DbId) -> AppError {
    AppError::Core(CoreError::Conflict(format!(
        "Job {job_id} changed status concurrently"
    )))
}
