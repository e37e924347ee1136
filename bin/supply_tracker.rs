use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use supply_tracker::{
    CoinGeckoClient, CronScheduler, Database, IngestionOrchestrator, Settings, SupplyService,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let db = Database::new(&settings)
        .await
        .context("Failed to initialize database connection")?;

    let provider = CoinGeckoClient::new(&settings.provider, &settings.policy)
        .context("Failed to initialize market data client")?;

    let orchestrator = Arc::new(IngestionOrchestrator::new(
        Arc::new(provider),
        db.series_store(),
        db.snapshot_store(),
        settings.policy.clone(),
    ));

    let cancellation_token = CancellationToken::new();

    let service = SupplyService::new(
        orchestrator.clone(),
        db.series_store(),
        db.snapshot_store(),
        cancellation_token.clone(),
    );

    match std::env::args().nth(1).as_deref() {
        Some("run-once") => run_once(&service).await,
        Some("stats") => print_stats(&service).await,
        Some(other) => anyhow::bail!("Unknown command '{}'. Expected run-once, stats or nothing", other),
        None => run_scheduler(settings, orchestrator, cancellation_token).await,
    }
}

async fn run_once(service: &SupplyService) -> anyhow::Result<()> {
    let summary = service
        .trigger_cycle()
        .await
        .context("Collection cycle aborted")?;

    info!(
        "Cycle for {} {} ({}): {}",
        summary.day,
        if summary.success { "succeeded" } else { "failed" },
        summary.state,
        summary.message
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn print_stats(service: &SupplyService) -> anyhow::Result<()> {
    let stats = service
        .series_statistics(Utc::now().date_naive())
        .await
        .context("Failed to compute series statistics")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn run_scheduler(
    settings: Arc<Settings>,
    orchestrator: Arc<IngestionOrchestrator>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let cron_scheduler = CronScheduler::new(orchestrator, settings.cron.clone());

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - collection cycles will run on schedule");

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Supply tracker running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");

    cancellation_token.cancel();

    // A running cycle stops at its next step; written observations are kept
    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Supply tracker stopped");
    Ok(())
}
