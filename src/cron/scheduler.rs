//! Cron scheduler for the supply collection cycle.
//!
//! Every configured cron expression triggers the same collect_supply job.
//! With `run_on_startup` set, one cycle also runs right after start.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::CronSettings;
use crate::ingest::IngestionOrchestrator;

use super::jobs;

/// Cron scheduler that manages the periodic collection job.
pub struct CronScheduler {
    orchestrator: Arc<IngestionOrchestrator>,
    settings: Arc<CronSettings>,
}

impl CronScheduler {
    pub fn new(orchestrator: Arc<IngestionOrchestrator>, settings: CronSettings) -> Self {
        Self {
            orchestrator,
            settings: Arc::new(settings),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        for schedule in &self.settings.schedules {
            self.register_collect_supply_job(&scheduler, schedule, &cancellation_token)
                .await?;
        }

        scheduler.start().await?;
        info!(
            "Cron scheduler started with {} jobs",
            self.settings.schedules.len()
        );

        if self.settings.run_on_startup {
            info!("Running startup collection cycle");
            if let Err(e) = jobs::collect_supply::run(&self.orchestrator, &cancellation_token).await {
                error!("Startup collection cycle failed: {:#}", e);
            }
        }

        // Wait for cancellation
        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_collect_supply_job(
        &self,
        scheduler: &JobScheduler,
        schedule: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        let orchestrator = self.orchestrator.clone();
        let token = cancellation_token.clone();

        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let orchestrator = orchestrator.clone();
            let token = token.clone();
            Box::pin(async move {
                if let Err(e) = jobs::collect_supply::run(&orchestrator, &token).await {
                    error!("Failed to collect supply: {:#}", e);
                }
            })
        })
        .with_context(|| format!("Invalid cron expression '{}'", schedule))?;

        scheduler.add(job).await?;
        info!("Registered collect_supply job ({})", schedule);
        Ok(())
    }
}
