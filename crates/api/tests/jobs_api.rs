//! Integration tests for job submission, authorization, idempotency, and
//! the worker callback flow.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, post, Auth, TEST_MAX_ATTEMPTS};
use serde_json::json;
use sqlx::PgPool;

fn submit_body(worker_type: &str) -> serde_json::Value {
    json!({
        "worker_type": worker_type,
        "payload": {"source_id": "src-1"},
    })
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn submit_without_credentials_is_unauthorized(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = post(app, "/api/v1/jobs", Auth::None, submit_body("collector")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn submit_with_garbage_token_is_unauthorized(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = post(
        app,
        "/api/v1/jobs",
        Auth::Bearer("not-a-jwt"),
        submit_body("collector"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn unauthorized_submit_creates_no_job(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    post(app, "/api/v1/jobs", Auth::None, submit_body("collector")).await;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0, "rejected submission must have no side effect");
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn submit_with_service_key_creates_pending_job(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let response = post(app, "/api/v1/jobs", Auth::ApiKey, submit_body("collector")).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["worker_type"], "collector");

    // The queue message is on the broker queue bound to the type.
    let depth: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = 'jobs.collector'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(depth, 1);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn submit_unknown_worker_type_is_rejected(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let response = post(app, "/api/v1/jobs", Auth::ApiKey, submit_body("uploader")).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_WORKER_TYPE");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn duplicate_idempotency_key_returns_original_job(pool: PgPool) {
    let body = json!({
        "worker_type": "bot",
        "payload": {"item": 1},
        "idempotency_key": "req-abc",
    });

    let app = common::build_test_app(pool.clone());
    let first = post(app.clone(), "/api/v1/jobs", Auth::ApiKey, body.clone()).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_id = body_json(first).await["data"]["id"].as_i64().unwrap();

    let second = post(app, "/api/v1/jobs", Auth::ApiKey, body).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second_id = body_json(second).await["data"]["id"].as_i64().unwrap();

    assert_eq!(first_id, second_id, "same key must resolve to the same job");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1, "duplicate submission must never create a second job");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn concurrent_duplicate_submissions_create_one_job(pool: PgPool) {
    let body = json!({
        "worker_type": "collector",
        "payload": {},
        "idempotency_key": "race-key",
    });

    let app = common::build_test_app(pool.clone());
    let (a, b) = tokio::join!(
        post(app.clone(), "/api/v1/jobs", Auth::ApiKey, body.clone()),
        post(app.clone(), "/api/v1/jobs", Auth::ApiKey, body.clone()),
    );
    assert!(a.status().is_success());
    assert!(b.status().is_success());

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE idempotency_key = 'race-key'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

// ---------------------------------------------------------------------------
// Visibility
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn users_see_only_their_own_jobs(pool: PgPool) {
    let app = common::build_test_app(pool);

    let alice = common::user_token(1);
    let bob = common::user_token(2);

    let created = post(
        app.clone(),
        "/api/v1/jobs",
        Auth::Bearer(&alice),
        submit_body("presenter"),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let job_id = body_json(created).await["data"]["id"].as_i64().unwrap();

    // Owner sees it.
    let own = get(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}"),
        Auth::Bearer(&alice),
    )
    .await;
    assert_eq!(own.status(), StatusCode::OK);

    // Another user does not.
    let other = get(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}"),
        Auth::Bearer(&bob),
    )
    .await;
    assert_eq!(other.status(), StatusCode::FORBIDDEN);

    // An admin does.
    let admin = common::admin_token(99);
    let admin_view = get(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}"),
        Auth::Bearer(&admin),
    )
    .await;
    assert_eq!(admin_view.status(), StatusCode::OK);

    // Listing scopes to the caller.
    let bob_list = get(app, "/api/v1/jobs", Auth::Bearer(&bob)).await;
    let items = body_json(bob_list).await["data"].as_array().unwrap().len();
    assert_eq!(items, 0);
}

// ---------------------------------------------------------------------------
// Worker callback flow
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn callbacks_require_service_key(pool: PgPool) {
    let app = common::build_test_app(pool);

    let created = post(
        app.clone(),
        "/api/v1/jobs",
        Auth::ApiKey,
        submit_body("collector"),
    )
    .await;
    let job_id = body_json(created).await["data"]["id"].as_i64().unwrap();

    // A user token is not enough for the callback surface.
    let token = common::user_token(1);
    let response = post(
        app,
        &format!("/api/v1/jobs/{job_id}/result"),
        Auth::Bearer(&token),
        json!({"outcome": "succeeded"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn success_flow_reaches_succeeded_and_emits_event(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    let created = post(
        app.clone(),
        "/api/v1/jobs",
        Auth::ApiKey,
        submit_body("collector"),
    )
    .await;
    let job_id = body_json(created).await["data"]["id"].as_i64().unwrap();

    let started = post(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}/start"),
        Auth::ApiKey,
        json!({"attempt": 1}),
    )
    .await;
    assert_eq!(started.status(), StatusCode::OK);
    assert_eq!(body_json(started).await["data"]["status"], "in_flight");

    let finished = post(
        app,
        &format!("/api/v1/jobs/{job_id}/result"),
        Auth::ApiKey,
        json!({"outcome": "succeeded"}),
    )
    .await;
    assert_eq!(finished.status(), StatusCode::OK);
    let json = body_json(finished).await;
    assert_eq!(json["data"]["status"], "succeeded");
    assert_eq!(json["data"]["attempt_count"], 1);

    // Every durable mutation produced a change event on the jobs channel,
    // with gap-free sequences.
    let seqs: Vec<i64> = sqlx::query_scalar(
        "SELECT seq FROM change_events WHERE channel = 'jobs' ORDER BY seq",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(seqs, vec![1, 2, 3], "submit, start, succeed each emit one event");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn retryable_failure_requeues_until_dead_letter(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    let created = post(
        app.clone(),
        "/api/v1/jobs",
        Auth::ApiKey,
        submit_body("bot"),
    )
    .await;
    let job_id = body_json(created).await["data"]["id"].as_i64().unwrap();

    // Attempts 1..max-1 requeue the job.
    for attempt in 1..TEST_MAX_ATTEMPTS as i64 {
        post(
            app.clone(),
            &format!("/api/v1/jobs/{job_id}/start"),
            Auth::ApiKey,
            json!({"attempt": attempt}),
        )
        .await;
        let failed = post(
            app.clone(),
            &format!("/api/v1/jobs/{job_id}/result"),
            Auth::ApiKey,
            json!({"outcome": "failed", "message": "fetch refused", "retryable": true}),
        )
        .await;
        let json = body_json(failed).await;
        assert_eq!(
            json["data"]["status"], "pending",
            "attempt {attempt} should requeue",
        );
    }

    // The final attempt dead-letters, exactly at max_attempts.
    post(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}/start"),
        Auth::ApiKey,
        json!({"attempt": TEST_MAX_ATTEMPTS}),
    )
    .await;
    let last = post(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}/result"),
        Auth::ApiKey,
        json!({"outcome": "failed", "message": "fetch refused", "retryable": true}),
    )
    .await;
    let json = body_json(last).await;
    assert_eq!(json["data"]["status"], "dead_lettered");
    assert_eq!(json["data"]["attempt_count"], TEST_MAX_ATTEMPTS as i64);

    // Dead-lettered jobs stay inspectable.
    let admin = common::admin_token(1);
    let listed = get(
        app,
        "/api/v1/jobs?status=dead_lettered",
        Auth::Bearer(&admin),
    )
    .await;
    let items = body_json(listed).await["data"].as_array().unwrap().len();
    assert_eq!(items, 1);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn non_retryable_failure_fails_immediately(pool: PgPool) {
    let app = common::build_test_app(pool);

    let created = post(
        app.clone(),
        "/api/v1/jobs",
        Auth::ApiKey,
        submit_body("publisher"),
    )
    .await;
    let job_id = body_json(created).await["data"]["id"].as_i64().unwrap();

    post(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}/start"),
        Auth::ApiKey,
        json!({"attempt": 1}),
    )
    .await;
    let failed = post(
        app,
        &format!("/api/v1/jobs/{job_id}/result"),
        Auth::ApiKey,
        json!({"outcome": "failed", "message": "malformed payload", "retryable": false}),
    )
    .await;

    let json = body_json(failed).await;
    assert_eq!(json["data"]["status"], "failed");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn timeout_counts_as_retryable_failure(pool: PgPool) {
    let app = common::build_test_app(pool);

    let created = post(
        app.clone(),
        "/api/v1/jobs",
        Auth::ApiKey,
        submit_body("collector"),
    )
    .await;
    let job_id = body_json(created).await["data"]["id"].as_i64().unwrap();

    post(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}/start"),
        Auth::ApiKey,
        json!({"attempt": 1}),
    )
    .await;
    let timed_out = post(
        app,
        &format!("/api/v1/jobs/{job_id}/result"),
        Auth::ApiKey,
        json!({"outcome": "timed_out", "elapsed_ms": 60000}),
    )
    .await;

    let json = body_json(timed_out).await;
    assert_eq!(json["data"]["status"], "pending");
    assert!(json["data"]["error_message"]
        .as_str()
        .unwrap()
        .contains("deadline"));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn duplicate_result_for_terminal_job_is_idempotent(pool: PgPool) {
    let app = common::build_test_app(pool);

    let created = post(
        app.clone(),
        "/api/v1/jobs",
        Auth::ApiKey,
        submit_body("collector"),
    )
    .await;
    let job_id = body_json(created).await["data"]["id"].as_i64().unwrap();

    post(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}/start"),
        Auth::ApiKey,
        json!({"attempt": 1}),
    )
    .await;
    post(
        app.clone(),
        &format!("/api/v1/jobs/{job_id}/result"),
        Auth::ApiKey,
        json!({"outcome": "succeeded"}),
    )
    .await;

    // A redelivered callback reports again; the answer is the settled row.
    let duplicate = post(
        app,
        &format!("/api/v1/jobs/{job_id}/result"),
        Auth::ApiKey,
        json!({"outcome": "failed", "message": "late duplicate", "retryable": true}),
    )
    .await;
    assert_eq!(duplicate.status(), StatusCode::OK);
    assert_eq!(body_json(duplicate).await["data"]["status"], "succeeded");
}
