//! Subprocess command handler.
//!
//! Runs a configured program per delivery, piping the job payload as JSON
//! to its stdin and capturing stdout/stderr. Exit code 0 is success (with
//! stdout parsed as the result when it is valid JSON); the reserved exit
//! code [`PERMANENT_FAILURE_EXIT_CODE`] marks a non-retryable failure,
//! anything else is retryable.
//!
//! The child is spawned with `kill_on_drop`, so when the runtime's
//! execution deadline fires and this future is dropped, the process is
//! killed with it.

use std::process::Stdio;

use async_trait::async_trait;
use osprey_broker::Delivery;
use osprey_core::error::CoreError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::handler::{HandlerFailure, JobHandler};

/// Exit code a handler program uses to signal "do not retry".
pub const PERMANENT_FAILURE_EXIT_CODE: i32 = 64;

/// Maximum stdout or stderr captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Executes one external program per job.
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
}

impl CommandHandler {
    /// Parse a whitespace-separated command line. No shell quoting; the
    /// payload travels on stdin, never on the command line.
    pub fn from_command_line(line: &str) -> Result<Self, CoreError> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next().ok_or_else(|| {
            CoreError::Validation("Handler command must not be empty".to_string())
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    async fn execute(&self, delivery: &Delivery) -> Result<serde_json::Value, HandlerFailure> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("OSPREY_JOB_ID", delivery.job_id.to_string())
            .env("OSPREY_ATTEMPT", delivery.attempt_number().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| HandlerFailure::retryable(format!("spawn failed: {e}")))?;

        // Write the payload to stdin, then close it. Best-effort: a
        // handler that closes stdin early is not an error by itself.
        if let Some(mut stdin) = child.stdin.take() {
            let bytes = serde_json::to_vec(&delivery.payload)
                .expect("delivery payload is always serialisable");
            let _ = stdin.write_all(&bytes).await;
            drop(stdin);
        }

        // Read output streams in spawned tasks so `child.wait()` can run.
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_task = tokio::spawn(read_capped(stdout_handle));
        let stderr_task = tokio::spawn(read_capped(stderr_handle));

        let status = child
            .wait()
            .await
            .map_err(|e| HandlerFailure::retryable(format!("wait failed: {e}")))?;

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            let stdout_text = String::from_utf8_lossy(&stdout);
            let result = serde_json::from_str(stdout_text.trim())
                .unwrap_or_else(|_| serde_json::json!({}));
            return Ok(result);
        }

        let exit_code = status.code().unwrap_or(-1);
        let stderr_text = String::from_utf8_lossy(&stderr);
        let message = format!(
            "{} exited with code {exit_code}: {}",
            self.program,
            stderr_text.trim(),
        );

        if exit_code == PERMANENT_FAILURE_EXIT_CODE {
            Err(HandlerFailure::permanent(message))
        } else {
            Err(HandlerFailure::retryable(message))
        }
    }
}

/// Read an entire output stream, capped at [`MAX_OUTPUT_BYTES`].
async fn read_capped<R: tokio::io::AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h).take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
    }
    buf
}
