//! In-process implementation of both stores.
//!
//! Backs unit and integration tests, and local dry runs that should not
//! touch PostgreSQL. Individual symbols can be marked as failing to
//! exercise partial batch failures.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rustc_hash::FxHashSet;
use tokio::sync::RwLock;

use super::models::{Observation, SnapshotBatch, SupplySeries, Symbol};
use super::{SnapshotStore, SupplySeriesStore};

#[derive(Default)]
pub struct MemoryStore {
    // Vec keeps series in creation order
    series: RwLock<Vec<SupplySeries>>,
    batches: RwLock<Vec<SnapshotBatch>>,
    failing_symbols: RwLock<FxHashSet<Symbol>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write for `symbol` fail.
    pub async fn fail_writes_for(&self, symbol: Symbol) {
        self.failing_symbols.write().await.insert(symbol);
    }

    pub async fn clear_write_failures(&self) {
        self.failing_symbols.write().await.clear();
    }

    pub async fn observation_count(&self) -> usize {
        self.series
            .read()
            .await
            .iter()
            .map(|s| s.observations.len())
            .sum()
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.read().await.len()
    }

    async fn check_writable(&self, symbol: &Symbol) -> anyhow::Result<()> {
        if self.failing_symbols.read().await.contains(symbol) {
            anyhow::bail!("write rejected for {}", symbol);
        }
        Ok(())
    }
}

#[async_trait]
impl SupplySeriesStore for MemoryStore {
    async fn has_observation_on_day(&self, symbol: &Symbol, day: NaiveDate) -> anyhow::Result<bool> {
        Ok(self
            .series
            .read()
            .await
            .iter()
            .any(|s| &s.symbol == symbol && s.has_observation_on_day(day)))
    }

    async fn append_observation(&self, symbol: &Symbol, observation: Observation) -> anyhow::Result<()> {
        self.check_writable(symbol).await?;

        let mut series = self.series.write().await;
        match series.iter_mut().find(|s| &s.symbol == symbol) {
            Some(existing) => existing.observations.push(observation),
            None => {
                let mut created = SupplySeries::new(symbol.clone());
                created.observations.push(observation);
                series.push(created);
            },
        }
        Ok(())
    }

    async fn replace_observation_on_day(
        &self,
        symbol: &Symbol,
        day: NaiveDate,
        observation: Observation,
    ) -> anyhow::Result<()> {
        self.check_writable(symbol).await?;

        {
            let mut series = self.series.write().await;
            if let Some(existing) = series.iter_mut().find(|s| &s.symbol == symbol) {
                existing.observations.retain(|o| o.day() != day);
            }
        }
        self.append_observation(symbol, observation).await
    }

    async fn all_observations(&self, symbol: &Symbol) -> anyhow::Result<Vec<Observation>> {
        Ok(self
            .series(symbol)
            .await?
            .map(|s| s.observations)
            .unwrap_or_default())
    }

    async fn series(&self, symbol: &Symbol) -> anyhow::Result<Option<SupplySeries>> {
        Ok(self
            .series
            .read()
            .await
            .iter()
            .find(|s| &s.symbol == symbol)
            .cloned())
    }

    async fn series_for(&self, symbols: &[Symbol]) -> anyhow::Result<Vec<SupplySeries>> {
        let wanted: FxHashSet<&Symbol> = symbols.iter().collect();
        Ok(self
            .series
            .read()
            .await
            .iter()
            .filter(|s| wanted.contains(&s.symbol))
            .cloned()
            .collect())
    }

    async fn all_series(&self) -> anyhow::Result<Vec<SupplySeries>> {
        Ok(self.series.read().await.clone())
    }

    async fn symbols_with_observation_on_day(&self, day: NaiveDate) -> anyhow::Result<Vec<Symbol>> {
        Ok(self
            .series
            .read()
            .await
            .iter()
            .filter(|s| s.has_observation_on_day(day))
            .map(|s| s.symbol.clone())
            .collect())
    }

    async fn delete_series(&self, symbol: &Symbol) -> anyhow::Result<bool> {
        let mut series = self.series.write().await;
        let before = series.len();
        series.retain(|s| &s.symbol != symbol);
        Ok(series.len() != before)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn has_batch_on_day(&self, day: NaiveDate) -> anyhow::Result<bool> {
        Ok(self.batches.read().await.iter().any(|b| b.day == day))
    }

    async fn save_batch(&self, batch: &SnapshotBatch) -> anyhow::Result<()> {
        self.batches.write().await.push(batch.clone());
        Ok(())
    }

    async fn replace_batch_on_day(&self, batch: &SnapshotBatch) -> anyhow::Result<()> {
        let mut batches = self.batches.write().await;
        batches.retain(|b| b.day != batch.day);
        batches.push(batch.clone());
        Ok(())
    }

    async fn latest_batch(&self) -> anyhow::Result<Option<SnapshotBatch>> {
        let batches = self.batches.read().await;
        let mut latest: Option<&SnapshotBatch> = None;
        for batch in batches.iter() {
            match latest {
                Some(current) if batch.taken_at < current.taken_at => {},
                _ => latest = Some(batch),
            }
        }
        Ok(latest.cloned())
    }

    async fn batches_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SnapshotBatch>> {
        let mut batches: Vec<SnapshotBatch> = self
            .batches
            .read()
            .await
            .iter()
            .filter(|b| b.taken_at >= start && b.taken_at <= end)
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.taken_at);
        Ok(batches)
    }

    async fn delete_all_batches(&self) -> anyhow::Result<u64> {
        let mut batches = self.batches.write().await;
        let deleted = batches.len() as u64;
        batches.clear();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, day, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_append_creates_series_then_appends() {
        let store = MemoryStore::new();
        let btc = Symbol::new("BTC");

        store
            .append_observation(&btc, Observation::new(1.0, noon(1)))
            .await
            .unwrap();
        store
            .append_observation(&btc, Observation::new(2.0, noon(2)))
            .await
            .unwrap();

        assert_eq!(store.all_observations(&btc).await.unwrap().len(), 2);
        assert_eq!(store.all_series().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_does_not_deduplicate_same_day() {
        let store = MemoryStore::new();
        let eth = Symbol::new("ETH");

        store
            .append_observation(&eth, Observation::new(1.0, noon(3)))
            .await
            .unwrap();
        store
            .append_observation(&eth, Observation::new(1.5, noon(3) + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.all_observations(&eth).await.unwrap().len(), 2);
        assert!(store
            .has_observation_on_day(&eth, noon(3).date_naive())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_replace_observation_on_day_keeps_other_days() {
        let store = MemoryStore::new();
        let sol = Symbol::new("SOL");
        store
            .append_observation(&sol, Observation::new(1.0, noon(1)))
            .await
            .unwrap();
        store
            .append_observation(&sol, Observation::new(2.0, noon(2)))
            .await
            .unwrap();

        store
            .replace_observation_on_day(&sol, noon(2).date_naive(), Observation::new(3.0, noon(2)))
            .await
            .unwrap();

        let values: Vec<f64> = store
            .all_observations(&sol)
            .await
            .unwrap()
            .iter()
            .map(|o| o.value)
            .collect();
        assert_eq!(values, vec![1.0, 3.0]);
    }

    #[tokio::test]
    async fn test_grouped_write_reports_partial_failure() {
        let store = MemoryStore::new();
        store.fail_writes_for(Symbol::new("BAD")).await;

        let batch = vec![
            (Symbol::new("GOOD"), Observation::new(1.0, noon(5))),
            (Symbol::new("BAD"), Observation::new(1.0, noon(5))),
            (Symbol::new("FINE"), Observation::new(1.0, noon(5))),
        ];
        let report = store.append_observations(&batch).await;

        assert_eq!(report.written, vec![Symbol::new("GOOD"), Symbol::new("FINE")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].symbol, Symbol::new("BAD"));
        assert_eq!(store.observation_count().await, 2);
    }

    #[tokio::test]
    async fn test_latest_batch_and_replace() {
        let store = MemoryStore::new();
        store.save_batch(&SnapshotBatch::new(noon(1), vec![])).await.unwrap();
        store.save_batch(&SnapshotBatch::new(noon(2), vec![])).await.unwrap();
        store
            .replace_batch_on_day(&SnapshotBatch::new(noon(2) + Duration::hours(2), vec![]))
            .await
            .unwrap();

        assert_eq!(store.batch_count().await, 2);
        let latest = store.latest_batch().await.unwrap().unwrap();
        assert_eq!(latest.taken_at, noon(2) + Duration::hours(2));
        assert!(store.has_batch_on_day(noon(1).date_naive()).await.unwrap());
        assert_eq!(store.delete_all_batches().await.unwrap(), 2);
    }
}
