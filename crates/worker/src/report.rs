//! Result reporting to the central service.
//!
//! [`ResultSink`] is the seam the runtime reports through; [`CoreClient`]
//! is the HTTP implementation, authenticated with the shared service key.
//! Reporting is best-effort with bounded retries -- job state convergence
//! is ultimately guaranteed by broker redelivery, not by any single
//! callback arriving.

use std::time::Duration;

use async_trait::async_trait;
use osprey_core::backoff::BackoffPolicy;
use osprey_core::job::{JobResultReport, JobStartReport};
use osprey_core::types::DbId;

/// Central-service response to an attempt-start report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAck {
    /// Proceed with execution.
    Proceed,
    /// The job is already terminal (stale redelivery); drop the delivery
    /// without executing.
    AlreadyTerminal,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn job_started(&self, job_id: DbId, attempt: i32) -> StartAck;
    async fn job_finished(&self, job_id: DbId, report: &JobResultReport);
}

/// HTTP client for the central service's worker callback endpoints.
pub struct CoreClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: BackoffPolicy,
    max_attempts: u32,
}

/// Callback request attempts before giving up on a report.
const DEFAULT_REPORT_ATTEMPTS: u32 = 4;

impl CoreClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry: BackoffPolicy::default(),
            max_attempts: DEFAULT_REPORT_ATTEMPTS,
        }
    }

    /// POST `body` to `path`, retrying transport failures and 5xx answers.
    ///
    /// Returns the final HTTP status, or `None` when every attempt failed
    /// to produce a response at all.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Option<reqwest::StatusCode> {
        let url = format!("{}{path}", self.base_url);

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }

            match self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        tracing::warn!(%url, %status, attempt, "Callback answered 5xx, retrying");
                        continue;
                    }
                    return Some(status);
                }
                Err(e) => {
                    tracing::warn!(%url, attempt, error = %e, "Callback request failed");
                }
            }
        }

        tracing::error!(%url, "Callback abandoned after {} attempts", self.max_attempts);
        None
    }
}

#[async_trait]
impl ResultSink for CoreClient {
    async fn job_started(&self, job_id: DbId, attempt: i32) -> StartAck {
        let body = serde_json::to_value(JobStartReport { attempt })
            .expect("JobStartReport is always serialisable");
        let status = self
            .post_with_retry(&format!("/api/v1/jobs/{job_id}/start"), &body)
            .await;

        match status {
            // 404: the job row is gone; 409: already terminal. Either way
            // executing would be wasted work on a stale delivery.
            Some(s) if s == reqwest::StatusCode::NOT_FOUND
                || s == reqwest::StatusCode::CONFLICT =>
            {
                tracing::info!(job_id, %s, "Stale delivery, skipping execution");
                StartAck::AlreadyTerminal
            }
            // Unreachable service is not a reason to drop work; execute
            // and let the result report (or redelivery) converge state.
            _ => StartAck::Proceed,
        }
    }

    async fn job_finished(&self, job_id: DbId, report: &JobResultReport) {
        let body = serde_json::to_value(report).expect("JobResultReport is always serialisable");
        self.post_with_retry(&format!("/api/v1/jobs/{job_id}/result"), &body)
            .await;
    }
}
