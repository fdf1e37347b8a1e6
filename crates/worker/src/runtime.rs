//! The worker pool runtime.
//!
//! One consume loop per configured worker type. Each loop keeps a
//! semaphore sized to the type's concurrency limit and only claims as many
//! messages as it has free permits (the credit window), so the broker
//! never hands the pool more unacknowledged deliveries than it can run.
//!
//! Per delivery: report the attempt start, execute the handler under the
//! deadline, then ack (success) or nack (failure/timeout). A timed-out
//! handler future is dropped -- subprocess handlers die with it via
//! `kill_on_drop` -- and immediately stops counting against the window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use osprey_broker::{Broker, Delivery};
use osprey_core::backoff::BackoffPolicy;
use osprey_core::job::JobResultReport;
use osprey_core::worker_type::WorkerTypeConfig;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::handler::{HandlerRegistry, JobHandler};
use crate::report::{ResultSink, StartAck};

/// Runtime tuning, shared by every type loop in the process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Queue poll interval.
    pub poll_interval: Duration,
    /// Handler execution deadline; exceeding it fails the attempt.
    pub deadline: Duration,
    /// Delivery attempts before a job is dead-lettered.
    pub max_attempts: u32,
    /// Delay policy for requeued deliveries.
    pub requeue_backoff: BackoffPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            deadline: Duration::from_secs(60),
            max_attempts: 3,
            requeue_backoff: BackoffPolicy::default(),
        }
    }
}

pub struct PoolRuntime {
    broker: Broker,
    handlers: HandlerRegistry,
    sink: Arc<dyn ResultSink>,
    types: Vec<WorkerTypeConfig>,
    config: RuntimeConfig,
}

impl PoolRuntime {
    pub fn new(
        broker: Broker,
        handlers: HandlerRegistry,
        sink: Arc<dyn ResultSink>,
        types: Vec<WorkerTypeConfig>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            broker,
            handlers,
            sink,
            types,
            config,
        }
    }

    /// Run one consume loop per configured type until cancelled, then
    /// drain in-flight jobs.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut handles = Vec::with_capacity(self.types.len());
        for type_config in self.types.clone() {
            let runtime = Arc::clone(&self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                runtime.run_type(type_config, cancel).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run_type(&self, type_config: WorkerTypeConfig, cancel: CancellationToken) {
        let Some(handler) = self.handlers.get(type_config.worker_type) else {
            tracing::error!(
                worker_type = %type_config.worker_type,
                "No handler registered for configured worker type",
            );
            return;
        };

        let limit = type_config.concurrency_limit as usize;
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut ticker = tokio::time::interval(self.config.poll_interval);

        tracing::info!(
            worker_type = %type_config.worker_type,
            queue = %type_config.queue,
            concurrency_limit = limit,
            "Consume loop started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(worker_type = %type_config.worker_type, "Consume loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.claim_cycle(&type_config, &handler, &semaphore).await;
                }
            }
        }

        // Drain: wait until every in-flight job has released its permit.
        let _ = semaphore.acquire_many(limit as u32).await;
        tracing::info!(worker_type = %type_config.worker_type, "Consume loop drained");
    }

    /// Claim up to the free credit and spawn execution tasks.
    async fn claim_cycle(
        &self,
        type_config: &WorkerTypeConfig,
        handler: &Arc<dyn JobHandler>,
        semaphore: &Arc<Semaphore>,
    ) {
        let credit = semaphore.available_permits() as u32;
        if credit == 0 {
            return;
        }

        let deliveries = match self.broker.claim(&type_config.queue, credit).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::error!(
                    queue = %type_config.queue,
                    error = %e,
                    "Claim failed",
                );
                return;
            }
        };

        for delivery in deliveries {
            // Claim count is bounded by the free permits, so this never
            // waits under the loop's single-claimer discipline.
            let permit = Arc::clone(semaphore)
                .acquire_owned()
                .await
                .expect("runtime semaphore is never closed");

            let broker = self.broker.clone();
            let sink = Arc::clone(&self.sink);
            let handler = Arc::clone(handler);
            let config = self.config.clone();

            tokio::spawn(async move {
                let _permit = permit;
                process_delivery(broker, sink, handler, config, delivery).await;
            });
        }
    }
}

/// Execute one delivery end to end: start report, handler under deadline,
/// ack/nack, result report.
async fn process_delivery(
    broker: Broker,
    sink: Arc<dyn ResultSink>,
    handler: Arc<dyn JobHandler>,
    config: RuntimeConfig,
    delivery: Delivery,
) {
    let attempt = delivery.attempt_number();
    let job_id = delivery.job_id;

    if sink.job_started(job_id, attempt).await == StartAck::AlreadyTerminal {
        // Stale redelivery of a finished job; retire the message.
        if let Err(e) = broker.ack(delivery.message_id).await {
            tracing::error!(job_id, error = %e, "Failed to ack stale delivery");
        }
        return;
    }

    tracing::info!(
        job_id,
        queue = %delivery.queue,
        attempt,
        "Executing job",
    );

    let started = Instant::now();
    let outcome = tokio::time::timeout(config.deadline, handler.execute(&delivery)).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(_result)) => {
            match broker.ack(delivery.message_id).await {
                Ok(()) => {
                    tracing::info!(job_id, attempt, elapsed_ms, "Job succeeded");
                    sink.job_finished(job_id, &JobResultReport::Succeeded).await;
                }
                Err(e) => {
                    // Without the ack the message redelivers; reporting
                    // success now would strand a live queue message, so
                    // leave convergence to the redelivery path.
                    tracing::error!(job_id, error = %e, "Ack failed, delivery will recur");
                }
            }
        }
        Ok(Err(failure)) => {
            tracing::warn!(
                job_id,
                attempt,
                retryable = failure.retryable,
                error = %failure.message,
                "Job handler failed",
            );
            let report = JobResultReport::Failed {
                message: failure.message.clone(),
                retryable: failure.retryable,
            };
            finish_failed(&broker, &sink, &config, &delivery, failure.retryable, report).await;
        }
        Err(_) => {
            tracing::warn!(job_id, attempt, elapsed_ms, "Job deadline exceeded");
            let report = JobResultReport::TimedOut { elapsed_ms };
            finish_failed(&broker, &sink, &config, &delivery, true, report).await;
        }
    }
}

/// Route a failed attempt: requeue with backoff while retryable attempts
/// remain, otherwise dead-letter. The result report is sent only after
/// the broker accepted the nack -- if the dead-letter write fails the
/// message keeps its lease and redelivers rather than vanishing.
async fn finish_failed(
    broker: &Broker,
    sink: &Arc<dyn ResultSink>,
    config: &RuntimeConfig,
    delivery: &Delivery,
    retryable: bool,
    report: JobResultReport,
) {
    let attempt = delivery.attempt_number();
    let exhausted = attempt >= config.max_attempts as i32;

    if retryable && !exhausted {
        let delay = config.requeue_backoff.delay_for(attempt as u32);
        if let Err(e) = broker.nack_requeue(delivery.message_id, delay).await {
            tracing::error!(
                job_id = delivery.job_id,
                error = %e,
                "Requeue nack failed, lease expiry will redeliver",
            );
            return;
        }
    } else {
        if let Err(e) = broker.nack_dead_letter(delivery.message_id).await {
            tracing::error!(
                job_id = delivery.job_id,
                error = %e,
                "Dead-letter nack failed, lease expiry will redeliver",
            );
            return;
        }
        tracing::warn!(
            job_id = delivery.job_id,
            attempt,
            retryable,
            "Delivery dead-lettered",
        );
    }

    sink.job_finished(delivery.job_id, &report).await;
}
