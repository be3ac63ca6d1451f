// service/background_jobs.rs
use chrono::Utc;
use tokio::time::{interval, Duration};

use crate::service::unlock_sweeper::UnlockSweeper;

/// Releases due wallet holds on a fixed interval. Each cycle runs until no
/// due holds remain; a failed cycle is logged and retried on the next tick.
pub async fn start_unlock_sweep_job(sweeper: UnlockSweeper, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        let now = Utc::now();
        tracing::debug!("Running unlock sweep job at {}", now);

        match sweeper.release_due_holds(now).await {
            Ok(summary) if !summary.failed.is_empty() => tracing::error!(
                "Unlock sweep job completed with {} stuck holds: {:?}",
                summary.failed.len(),
                summary.failed
            ),
            Ok(summary) if summary.released > 0 => tracing::info!(
                "Unlock sweep job completed: {} holds released ({})",
                summary.released,
                summary.amount
            ),
            Ok(_) => tracing::debug!("Unlock sweep job completed: nothing due"),
            Err(e) => tracing::error!("Unlock sweep job failed: {}", e),
        }
    }
}
