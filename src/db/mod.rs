use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::info;

use crate::config::Settings;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresClient;

use models::{BatchWriteReport, Observation, SnapshotBatch, SupplySeries, Symbol};

/// Per-symbol append-only supply history.
///
/// The store never deduplicates. Callers check
/// [`has_observation_on_day`](SupplySeriesStore::has_observation_on_day)
/// before appending to keep one observation per symbol per UTC day.
#[async_trait]
pub trait SupplySeriesStore: Send + Sync {
    async fn has_observation_on_day(&self, symbol: &Symbol, day: NaiveDate) -> anyhow::Result<bool>;

    /// Creates the series when absent, then appends.
    async fn append_observation(&self, symbol: &Symbol, observation: Observation) -> anyhow::Result<()>;

    /// Grouped append. Failures are reported per symbol; successful writes are kept.
    async fn append_observations(&self, batch: &[(Symbol, Observation)]) -> BatchWriteReport {
        let mut report = BatchWriteReport::default();
        for (symbol, observation) in batch {
            match self.append_observation(symbol, *observation).await {
                Ok(()) => report.written.push(symbol.clone()),
                Err(e) => report.record_failure(symbol.clone(), format!("{:#}", e)),
            }
        }
        report
    }

    /// Drops the symbol's observations on `day` and appends `observation`.
    async fn replace_observation_on_day(
        &self,
        symbol: &Symbol,
        day: NaiveDate,
        observation: Observation,
    ) -> anyhow::Result<()>;

    /// All observations of a symbol, in no particular order.
    async fn all_observations(&self, symbol: &Symbol) -> anyhow::Result<Vec<Observation>>;

    async fn series(&self, symbol: &Symbol) -> anyhow::Result<Option<SupplySeries>>;

    async fn series_for(&self, symbols: &[Symbol]) -> anyhow::Result<Vec<SupplySeries>>;

    async fn all_series(&self) -> anyhow::Result<Vec<SupplySeries>>;

    async fn symbols_with_observation_on_day(&self, day: NaiveDate) -> anyhow::Result<Vec<Symbol>>;

    /// Maintenance only. Returns whether a series existed.
    async fn delete_series(&self, symbol: &Symbol) -> anyhow::Result<bool>;
}

/// Daily snapshot batches, one per collection cycle.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn has_batch_on_day(&self, day: NaiveDate) -> anyhow::Result<bool>;

    async fn save_batch(&self, batch: &SnapshotBatch) -> anyhow::Result<()>;

    /// Replaces every batch of `batch.day` with `batch`.
    async fn replace_batch_on_day(&self, batch: &SnapshotBatch) -> anyhow::Result<()>;

    async fn latest_batch(&self) -> anyhow::Result<Option<SnapshotBatch>>;

    /// Batches taken within `[start, end]`, oldest first.
    async fn batches_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SnapshotBatch>>;

    /// Maintenance only. Returns the number of deleted batches.
    async fn delete_all_batches(&self) -> anyhow::Result<u64>;
}

/// Database handle exposing the PostgreSQL-backed stores.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;

        postgres.health_check().await?;
        postgres.migrate().await?;

        info!("Supply stores ready (PostgreSQL)");

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }

    pub fn series_store(&self) -> Arc<dyn SupplySeriesStore> {
        self.postgres.clone()
    }

    pub fn snapshot_store(&self) -> Arc<dyn SnapshotStore> {
        self.postgres.clone()
    }
}
