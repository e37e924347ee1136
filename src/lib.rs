pub mod config;
pub mod cron;
pub mod db;
pub mod ingest;
pub mod provider;
pub mod service;
pub mod supply;
pub mod utils;

pub use config::Settings;
pub use cron::CronScheduler;
pub use db::{Database, MemoryStore, PostgresClient};
pub use ingest::{CycleSummary, IngestionOrchestrator};
pub use provider::{CoinGeckoClient, MarketDataProvider};
pub use service::SupplyService;
