//! The scheduler beat.
//!
//! Ticks on a fixed interval and, for every enabled schedule whose cron
//! trigger has a newly due tick, enqueues one job. The check-and-advance
//! runs in a single transaction holding the schedule's row lock, so:
//!
//! - a crash between insert and advance rolls the whole fire back, and the
//!   next beat re-fires the window exactly once;
//! - concurrent beat instances cannot double-fire -- whoever holds the
//!   lock advances `last_fired_at`, everyone else skips.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use osprey_broker::Broker;
use osprey_core::trigger::Trigger;
use osprey_core::types::DbId;
use osprey_core::worker_type::WorkerTypeRegistry;
use osprey_db::models::job::SubmitJob;
use osprey_db::models::schedule::Schedule;
use osprey_db::repositories::{JobRepo, ScheduleRepo};
use osprey_db::DbPool;
use osprey_notify::event::{CHANNEL_JOBS, CHANNEL_SCHEDULES};
use osprey_notify::NotifyHub;
use tokio_util::sync::CancellationToken;

type BeatError = Box<dyn std::error::Error + Send + Sync>;

/// A completed fire, for event publication after commit.
struct Fired {
    schedule: Schedule,
    job_id: DbId,
    fired_tick: chrono::DateTime<Utc>,
}

pub struct Beat {
    pool: DbPool,
    registry: Arc<WorkerTypeRegistry>,
    hub: Arc<NotifyHub>,
    interval: Duration,
}

impl Beat {
    pub fn new(
        pool: DbPool,
        registry: Arc<WorkerTypeRegistry>,
        hub: Arc<NotifyHub>,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            registry,
            hub,
            interval,
        }
    }

    /// Run the beat loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Scheduler beat started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler beat shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass over every enabled schedule. Failures on one schedule are
    /// logged and never stop the others.
    pub async fn tick(&self) {
        let ids = match ScheduleRepo::enabled_ids(&self.pool).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Beat could not list schedules");
                return;
            }
        };

        for id in ids {
            match self.fire_if_due(id).await {
                Ok(Some(fired)) => self.publish_fire_events(&fired).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(schedule_id = id, error = %e, "Schedule fire failed");
                }
            }
        }
    }

    /// Fire one schedule if a new trigger tick is due.
    ///
    /// Job insert, queue message, and `last_fired_at` advance commit
    /// atomically under the schedule's row lock.
    async fn fire_if_due(&self, id: DbId) -> Result<Option<Fired>, BeatError> {
        let mut tx = self.pool.begin().await?;

        // Locked by another beat instance (or disabled since listing):
        // nothing to do, the holder advances the schedule.
        let Some(schedule) = ScheduleRepo::lock(&mut *tx, id).await? else {
            return Ok(None);
        };

        let trigger = match Trigger::parse(&schedule.trigger_expr) {
            Ok(trigger) => trigger,
            Err(e) => {
                tracing::error!(
                    schedule_id = id,
                    schedule = %schedule.name,
                    error = %e,
                    "Schedule has an invalid trigger expression, skipping",
                );
                return Ok(None);
            }
        };

        let anchor = schedule.last_fired_at.unwrap_or(schedule.created_at);
        let now = Utc::now();
        let Some(due) = trigger.latest_due(anchor, now) else {
            return Ok(None);
        };

        let type_config = match self.registry.require_by_name(&schedule.worker_type_name) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(
                    schedule_id = id,
                    schedule = %schedule.name,
                    error = %e,
                    "Schedule targets an unregistered worker type, skipping",
                );
                return Ok(None);
            }
        };

        let input = SubmitJob {
            worker_type: schedule.worker_type_name.clone(),
            payload: schedule.payload.clone(),
            priority: Some(schedule.priority),
            idempotency_key: None,
        };
        let job = JobRepo::insert_tx(&mut *tx, None, &input).await?;
        Broker::enqueue_tx(&mut *tx, &type_config.queue, job.id, job.priority, &job.payload).await?;
        ScheduleRepo::advance(&mut *tx, id, due).await?;

        tx.commit().await?;

        tracing::info!(
            schedule_id = id,
            schedule = %schedule.name,
            job_id = job.id,
            fired_tick = %due,
            "Schedule fired",
        );

        Ok(Some(Fired {
            schedule,
            job_id: job.id,
            fired_tick: due,
        }))
    }

    /// Change events for a committed fire: the new pending job and the
    /// schedule tick itself.
    async fn publish_fire_events(&self, fired: &Fired) {
        let job_payload = serde_json::json!({
            "job_id": fired.job_id,
            "worker_type": fired.schedule.worker_type_name,
            "status": osprey_core::job::JobStatus::Pending.as_str(),
            "attempt_count": 0,
        });
        if let Err(e) = self.hub.publish(CHANNEL_JOBS, job_payload).await {
            tracing::error!(job_id = fired.job_id, error = %e, "Failed to publish job event");
        }

        let schedule_payload = serde_json::json!({
            "schedule_id": fired.schedule.id,
            "schedule": fired.schedule.name,
            "job_id": fired.job_id,
            "fired_tick": fired.fired_tick,
        });
        if let Err(e) = self.hub.publish(CHANNEL_SCHEDULES, schedule_payload).await {
            tracing::error!(
                schedule_id = fired.schedule.id,
                error = %e,
                "Failed to publish schedule event",
            );
        }
    }
}
