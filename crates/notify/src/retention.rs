//! Periodic purge of change events outside the replay window.

use std::time::Duration;

use osprey_db::repositories::EventRepo;
use osprey_db::DbPool;
use tokio_util::sync::CancellationToken;

/// How often the purge runs.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Run the retention loop until cancelled.
///
/// Keeps the newest `replay_window` events per channel; everything older
/// can no longer be replayed and resuming past it yields a resume gap.
pub async fn run(pool: DbPool, replay_window: i64, cancel: CancellationToken) {
    tracing::info!(
        replay_window,
        interval_secs = PURGE_INTERVAL.as_secs(),
        "Event retention job started",
    );

    let mut interval = tokio::time::interval(PURGE_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Event retention job stopping");
                break;
            }
            _ = interval.tick() => {
                match EventRepo::purge_outside_window(&pool, replay_window).await {
                    Ok(0) => {
                        tracing::debug!("Event retention: nothing to purge");
                    }
                    Ok(purged) => {
                        tracing::info!(purged, "Event retention: purged aged-out events");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Event retention: purge failed");
                    }
                }
            }
        }
    }
}
