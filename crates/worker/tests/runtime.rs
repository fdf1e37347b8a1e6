//! Runtime tests: concurrency bounding, retry-to-dead-letter accounting,
//! and stale-delivery handling, using stub handlers and a recording sink.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use osprey_broker::{Broker, BrokerConfig, Delivery};
use osprey_core::backoff::BackoffPolicy;
use osprey_core::job::JobResultReport;
use osprey_core::types::DbId;
use osprey_core::worker_type::{WorkerType, WorkerTypeConfig};
use osprey_worker::handler::{HandlerFailure, HandlerRegistry, JobHandler};
use osprey_worker::report::{ResultSink, StartAck};
use osprey_worker::runtime::{PoolRuntime, RuntimeConfig};
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Records every callback instead of talking to the central service.
#[derive(Default)]
struct RecordingSink {
    started: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    /// `StartAck` to answer with; index 0 = Proceed, 1 = AlreadyTerminal.
    answer_terminal: AtomicUsize,
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn job_started(&self, _job_id: DbId, _attempt: i32) -> StartAck {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.answer_terminal.load(Ordering::SeqCst) == 1 {
            StartAck::AlreadyTerminal
        } else {
            StartAck::Proceed
        }
    }

    async fn job_finished(&self, _job_id: DbId, report: &JobResultReport) {
        match report {
            JobResultReport::Succeeded => self.succeeded.fetch_add(1, Ordering::SeqCst),
            _ => self.failed.fetch_add(1, Ordering::SeqCst),
        };
    }
}

/// Sleeps while tracking how many invocations run at once.
struct SlowHandler {
    current: AtomicI32,
    peak: AtomicI32,
    hold: Duration,
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn execute(&self, _delivery: &Delivery) -> Result<serde_json::Value, HandlerFailure> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({}))
    }
}

/// Always fails, retryably.
struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    async fn execute(&self, _delivery: &Delivery) -> Result<serde_json::Value, HandlerFailure> {
        Err(HandlerFailure::retryable("simulated failure"))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn seed_job(pool: &PgPool) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO jobs (worker_type, status) VALUES ('collector', 'pending') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap()
}

fn fast_runtime_config(max_attempts: u32) -> RuntimeConfig {
    RuntimeConfig {
        poll_interval: Duration::from_millis(20),
        deadline: Duration::from_secs(5),
        max_attempts,
        requeue_backoff: BackoffPolicy::constant(Duration::ZERO),
    }
}

fn collector_type(limit: u32) -> WorkerTypeConfig {
    WorkerTypeConfig::new(WorkerType::Collector).with_concurrency(limit)
}

/// Poll `check` until it returns true or the budget runs out.
async fn wait_until<F: Fn() -> bool>(check: F, what: &str) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn concurrency_never_exceeds_the_limit(pool: PgPool) {
    const LIMIT: u32 = 2;
    const JOBS: usize = 8;

    let broker = Broker::new(pool.clone(), BrokerConfig::default());
    for _ in 0..JOBS {
        let job_id = seed_job(&pool).await;
        broker
            .publish("jobs.collector", job_id, 0, &json!({}))
            .await
            .unwrap();
    }

    let handler = Arc::new(SlowHandler {
        current: AtomicI32::new(0),
        peak: AtomicI32::new(0),
        hold: Duration::from_millis(100),
    });
    let sink = Arc::new(RecordingSink::default());

    let runtime = Arc::new(PoolRuntime::new(
        broker.clone(),
        HandlerRegistry::new().register(WorkerType::Collector, handler.clone()),
        sink.clone(),
        vec![collector_type(LIMIT)],
        fast_runtime_config(3),
    ));

    let cancel = CancellationToken::new();
    let run = tokio::spawn(Arc::clone(&runtime).run(cancel.clone()));

    wait_until(
        || sink.succeeded.load(Ordering::SeqCst) == JOBS,
        "all jobs to finish",
    )
    .await;

    cancel.cancel();
    let _ = run.await;

    assert!(
        handler.peak.load(Ordering::SeqCst) <= LIMIT as i32,
        "peak concurrency {} exceeded the limit {LIMIT}",
        handler.peak.load(Ordering::SeqCst),
    );
    assert_eq!(broker.depth("jobs.collector").await.unwrap(), 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn failing_handler_dead_letters_at_max_attempts(pool: PgPool) {
    const MAX_ATTEMPTS: u32 = 3;

    let broker = Broker::new(pool.clone(), BrokerConfig::default());
    let job_id = seed_job(&pool).await;
    broker
        .publish("jobs.collector", job_id, 0, &json!({}))
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let runtime = Arc::new(PoolRuntime::new(
        broker.clone(),
        HandlerRegistry::new().register(WorkerType::Collector, Arc::new(FailingHandler)),
        sink.clone(),
        vec![collector_type(1)],
        fast_runtime_config(MAX_ATTEMPTS),
    ));

    let cancel = CancellationToken::new();
    let run = tokio::spawn(Arc::clone(&runtime).run(cancel.clone()));

    // One failure report per attempt, exactly max_attempts of them.
    wait_until(
        || sink.failed.load(Ordering::SeqCst) == MAX_ATTEMPTS as usize,
        "retries to exhaust",
    )
    .await;

    // Give a straggling extra attempt the chance to show up (it must not).
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let _ = run.await;

    assert_eq!(sink.failed.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
    assert_eq!(sink.succeeded.load(Ordering::SeqCst), 0);

    let dead: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM queue_messages WHERE job_id = $1 AND dead_lettered",
    )
    .bind(job_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(dead, 1, "the delivery parks in the dead-letter state");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn stale_delivery_is_acked_without_execution(pool: PgPool) {
    let broker = Broker::new(pool.clone(), BrokerConfig::default());
    let job_id = seed_job(&pool).await;
    broker
        .publish("jobs.collector", job_id, 0, &json!({}))
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    sink.answer_terminal.store(1, Ordering::SeqCst);

    let handler = Arc::new(SlowHandler {
        current: AtomicI32::new(0),
        peak: AtomicI32::new(0),
        hold: Duration::from_millis(10),
    });
    let runtime = Arc::new(PoolRuntime::new(
        broker.clone(),
        HandlerRegistry::new().register(WorkerType::Collector, handler.clone()),
        sink.clone(),
        vec![collector_type(1)],
        fast_runtime_config(3),
    ));

    let cancel = CancellationToken::new();
    let run = tokio::spawn(Arc::clone(&runtime).run(cancel.clone()));

    wait_until(|| sink.started.load(Ordering::SeqCst) >= 1, "start report").await;
    wait_until(
        || {
            // The message is retired without running the handler.
            handler.peak.load(Ordering::SeqCst) == 0
                && sink.succeeded.load(Ordering::SeqCst) == 0
        },
        "stale delivery to be dropped",
    )
    .await;

    // Queue drains even though nothing executed.
    wait_until_depth_zero(&broker).await;

    cancel.cancel();
    let _ = run.await;
}

async fn wait_until_depth_zero(broker: &Broker) {
    for _ in 0..250 {
        if broker.depth("jobs.collector").await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("queue never drained");
}
