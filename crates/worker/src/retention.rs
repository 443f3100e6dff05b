//! Periodic cleanup of expired jobs.
//!
//! Deletes terminal jobs older than the retention period on a fixed
//! interval using `tokio::time::interval`. Pending and running jobs are
//! never touched.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::manager::JobManager;

/// Run the retention loop until `cancel` is triggered.
///
/// The first sweep happens immediately.
pub async fn run(
    manager: Arc<JobManager>,
    retention: chrono::Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_days = retention.num_days(),
        interval_secs = every.as_secs(),
        "Job retention task started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                match manager.cleanup_expired(retention).await {
                    Ok(0) => tracing::debug!("Job retention: nothing to purge"),
                    Ok(deleted) => tracing::info!(deleted, "Job retention: purged expired jobs"),
                    Err(e) => tracing::error!(error = %e, "Job retention: cleanup failed"),
                }
            }
        }
    }
}
