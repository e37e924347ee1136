//! Query and maintenance operations over the supply stores.
//!
//! [`SupplyService`] is what an outer HTTP or CLI layer calls. It holds no
//! state of its own besides the stores and the orchestrator.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::info;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ChangePolicy;
use crate::db::models::{CoinRecord, Observation, SnapshotBatch, SupplySeries, Symbol};
use crate::db::{SnapshotStore, SupplySeriesStore};
use crate::ingest::{CycleError, CycleSummary, IngestionOrchestrator};
use crate::supply::report::{self, CoinSupplyDetails, ComparisonEntry, SeriesStatistics, SupplyDetails};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("an observation for {symbol} already exists on {day}")]
    AlreadyRecorded { symbol: Symbol, day: NaiveDate },

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// One page of the latest snapshot batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinPage {
    pub coins: Vec<CoinRecord>,
    pub page: usize,
    pub limit: usize,
    pub total_coins: usize,
    pub max_page: usize,
    pub last_updated: DateTime<Utc>,
}

/// A coin's market values as recorded in one snapshot batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinHistoryPoint {
    pub date: DateTime<Utc>,
    pub price: Option<f64>,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub circulating_supply: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub entries: Vec<ComparisonEntry>,
    pub generated_at: DateTime<Utc>,
}

pub struct SupplyService {
    orchestrator: Arc<IngestionOrchestrator>,
    series: Arc<dyn SupplySeriesStore>,
    snapshots: Arc<dyn SnapshotStore>,
    changes: ChangePolicy,
    shutdown: CancellationToken,
}

impl SupplyService {
    pub fn new(
        orchestrator: Arc<IngestionOrchestrator>,
        series: Arc<dyn SupplySeriesStore>,
        snapshots: Arc<dyn SnapshotStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let changes = orchestrator.policy().changes.clone();
        Self {
            orchestrator,
            series,
            snapshots,
            changes,
            shutdown,
        }
    }

    /// Runs a collection cycle now. Cancelled when the service shuts down.
    pub async fn trigger_cycle(&self) -> Result<CycleSummary, CycleError> {
        info!("Collection cycle triggered manually");
        self.orchestrator.run_cycle(&self.shutdown.child_token()).await
    }

    pub async fn latest_series(&self, symbol: &str) -> Result<SupplySeries, QueryError> {
        let symbol = parse_symbol(symbol)?;
        self.series
            .series(&symbol)
            .await?
            .ok_or_else(|| QueryError::NotFound(format!("no supply history for {}", symbol)))
    }

    /// Per symbol, the latest observation of each UTC day, newest first.
    /// Unknown symbols are left out.
    pub async fn bulk_series(&self, symbols: &[&str]) -> Result<Vec<SupplySeries>, QueryError> {
        let symbols: Vec<Symbol> = symbols
            .iter()
            .map(|s| Symbol::new(s))
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(QueryError::InvalidRequest("at least one symbol is required".to_string()));
        }

        let found = self.series.series_for(&symbols).await?;
        Ok(found
            .into_iter()
            .map(|s| SupplySeries {
                observations: s.daily_latest(),
                symbol: s.symbol,
            })
            .collect())
    }

    /// Observations of `symbol` within the inclusive range, in stored order.
    pub async fn series_in_range(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SupplySeries, QueryError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(QueryError::InvalidRequest(format!(
                    "range start {} is after end {}",
                    start, end
                )));
            }
        }

        let mut series = self.latest_series(symbol).await?;
        series.observations.retain(|o| {
            start.map_or(true, |s| o.timestamp >= s) && end.map_or(true, |e| o.timestamp <= e)
        });
        Ok(series)
    }

    /// Manual save of one reading. Rejected when the symbol already has an
    /// observation on the UTC day of `now`.
    pub async fn record_observation(
        &self,
        symbol: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<Observation, QueryError> {
        let symbol = parse_symbol(symbol)?;
        if !value.is_finite() || value < 0.0 {
            return Err(QueryError::InvalidRequest(format!(
                "circulating supply must be a non-negative number, got {}",
                value
            )));
        }

        let day = now.date_naive();
        if self.series.has_observation_on_day(&symbol, day).await? {
            return Err(QueryError::AlreadyRecorded { symbol, day });
        }

        let observation = Observation::new(value, now);
        self.series.append_observation(&symbol, observation).await?;
        info!("Recorded supply {} for {} on {}", value, symbol, day);
        Ok(observation)
    }

    /// `page` starts at 1.
    pub async fn coin_page(&self, page: usize, limit: usize) -> Result<CoinPage, QueryError> {
        if page == 0 || limit == 0 {
            return Err(QueryError::InvalidRequest(
                "page and limit must be at least 1".to_string(),
            ));
        }

        let batch = self.latest_batch().await?;
        let total_coins = batch.coins.len();
        let max_page = total_coins.div_ceil(limit);
        let start = (page - 1).saturating_mul(limit);

        if start >= total_coins {
            return Err(QueryError::InvalidRequest(format!(
                "page {} exceeds available data, max page: {}",
                page, max_page
            )));
        }

        let end = (start + limit).min(total_coins);
        Ok(CoinPage {
            coins: batch.coins[start..end].to_vec(),
            page,
            limit,
            total_coins,
            max_page,
            last_updated: batch.taken_at,
        })
    }

    /// Market values of `symbol` across the snapshot batches of the last
    /// `days` days, oldest first.
    pub async fn coin_history(
        &self,
        symbol: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoinHistoryPoint>, QueryError> {
        let symbol = parse_symbol(symbol)?;
        let start = now - Duration::days(i64::from(days));

        let history: Vec<CoinHistoryPoint> = self
            .snapshots
            .batches_between(start, now)
            .await?
            .iter()
            .filter_map(|batch| {
                batch.coin(&symbol).map(|coin| CoinHistoryPoint {
                    date: batch.taken_at,
                    price: coin.price,
                    volume_24h: coin.volume_24h,
                    market_cap: coin.market_cap,
                    circulating_supply: coin.circulating_supply,
                })
            })
            .collect();

        if history.is_empty() {
            return Err(QueryError::NotFound(format!("no historical data for {}", symbol)));
        }
        Ok(history)
    }

    pub async fn supply_details(&self, now: DateTime<Utc>) -> Result<Vec<SupplyDetails>, QueryError> {
        let all = self.series.all_series().await?;
        Ok(all
            .iter()
            .map(|s| report::supply_details(s, &self.changes, now))
            .collect())
    }

    pub async fn coin_supply_details(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<CoinSupplyDetails, QueryError> {
        let series = self.latest_series(symbol).await?;
        Ok(report::coin_supply_details(&series, &self.changes, now))
    }

    pub async fn comparison_report(&self, now: DateTime<Utc>) -> Result<ComparisonReport, QueryError> {
        let all = self.series.all_series().await?;
        Ok(ComparisonReport {
            entries: all
                .iter()
                .filter_map(|s| report::comparison_entry(s, &self.changes, now))
                .collect(),
            generated_at: now,
        })
    }

    pub async fn series_statistics(&self, today: NaiveDate) -> Result<SeriesStatistics, QueryError> {
        let all = self.series.all_series().await?;
        Ok(report::series_statistics(&all, today))
    }

    /// Replaces the batch of `batch.day`, the only way to change a saved batch.
    pub async fn replace_snapshot(&self, batch: &SnapshotBatch) -> Result<(), QueryError> {
        self.snapshots.replace_batch_on_day(batch).await?;
        info!("Replaced snapshot batch for {} ({} coins)", batch.day, batch.coins.len());
        Ok(())
    }

    /// Maintenance: drops every snapshot batch. Returns how many were deleted.
    pub async fn reset_snapshots(&self) -> Result<u64, QueryError> {
        let deleted = self.snapshots.delete_all_batches().await?;
        info!("Deleted {} snapshot batches", deleted);
        Ok(deleted)
    }

    /// Maintenance: drops a symbol's whole series.
    pub async fn delete_series(&self, symbol: &str) -> Result<(), QueryError> {
        let symbol = parse_symbol(symbol)?;
        if !self.series.delete_series(&symbol).await? {
            return Err(QueryError::NotFound(format!("no supply history for {}", symbol)));
        }
        info!("Deleted supply series {}", symbol);
        Ok(())
    }

    async fn latest_batch(&self) -> Result<SnapshotBatch, QueryError> {
        self.snapshots
            .latest_batch()
            .await?
            .ok_or_else(|| QueryError::NotFound("no coin data available".to_string()))
    }
}

fn parse_symbol(raw: &str) -> Result<Symbol, QueryError> {
    let symbol = Symbol::new(raw);
    if symbol.is_empty() {
        return Err(QueryError::InvalidRequest("symbol is required".to_string()));
    }
    Ok(symbol)
}
