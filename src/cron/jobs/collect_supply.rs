//! Job running one supply collection cycle.
//!
//! Scheduled hourly and at midnight UTC. Runs after the first successful
//! cycle of a day are skipped by the orchestrator, so extra triggers only
//! retry what an earlier run left unfinished.

use anyhow::{Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::ingest::{CycleState, IngestionOrchestrator};

pub async fn run(orchestrator: &IngestionOrchestrator, cancel: &CancellationToken) -> Result<()> {
    info!("Starting collect_supply job...");

    let start = std::time::Instant::now();

    let summary = orchestrator
        .run_cycle(cancel)
        .await
        .context("Supply collection cycle aborted")?;

    if summary.state == CycleState::Skipped {
        info!("collect_supply job skipped: {}", summary.message);
        return Ok(());
    }

    if !summary.success {
        warn!(
            "collect_supply job finished with errors in {:?}: {}",
            start.elapsed(),
            summary.message
        );
        return Ok(());
    }

    info!(
        "Completed collect_supply job in {:?} ({} pages, {} written, {} already present, {} backfilled)",
        start.elapsed(),
        summary.counts.pages_fetched,
        summary.counts.written,
        summary.counts.already_present,
        summary.counts.backfill_recovered
    );
    Ok(())
}
