use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::alert::confirm::ConfirmationHub;

/// Periodic liveness line reporting how many prompts are still open.
pub struct Heartbeat {
    // Held so the job lives as long as the relay.
    _scheduler: JobScheduler,
    beats: Arc<AtomicU64>,
}

impl Heartbeat {
    /// Schedule the heartbeat on `cron_expr` (six fields, seconds first) and
    /// start it.
    pub async fn start(cron_expr: &str, confirmations: ConfirmationHub) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;

        let beats = Arc::new(AtomicU64::new(0));
        let counter = beats.clone();
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let beat = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let pending = confirmations.pending_count();
            Box::pin(async move {
                info!(
                    "Heartbeat #{}: alert relay is alive, {} prompt(s) pending",
                    beat, pending
                );
            })
        })
        .with_context(|| format!("Invalid heartbeat cron expression: {}", cron_expr))?;

        scheduler
            .add(job)
            .await
            .context("Failed to schedule heartbeat")?;
        scheduler
            .start()
            .await
            .context("Failed to start scheduler")?;

        info!("Heartbeat scheduled with cron: {}", cron_expr);
        Ok(Self {
            _scheduler: scheduler,
            beats,
        })
    }

    /// Number of heartbeats logged so far.
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }
}
