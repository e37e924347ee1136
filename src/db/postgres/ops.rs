use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::error;
use tokio_postgres::types::Json;

use crate::db::models::{
    BatchWriteReport, CoinRecord, Observation, SnapshotBatch, SupplySeries, Symbol,
};
use crate::db::postgres::PostgresClient;
use crate::db::{SnapshotStore, SupplySeriesStore};
use crate::utils::{day_bounds, sanitize_string};

/// Upserts the series row and appends one observation in a single statement.
const APPEND_OBSERVATION: &str = r#"
    WITH series AS (
        INSERT INTO supply.supply_series (symbol)
        VALUES ($1)
        ON CONFLICT (symbol) DO UPDATE SET updated_at = NOW()
        RETURNING symbol
    )
    INSERT INTO supply.supply_observations (symbol, value, observed_at)
    SELECT symbol, $2, $3 FROM series
"#;

const INSERT_BATCH: &str = r#"
    INSERT INTO supply.snapshot_batches (batch_date, taken_at, coin_count, coins)
    VALUES ($1, $2, $3, $4)
"#;

// ==================== SUPPLY SERIES ====================

#[async_trait]
impl SupplySeriesStore for PostgresClient {
    async fn has_observation_on_day(&self, symbol: &Symbol, day: NaiveDate) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let (start, end) = day_bounds(day);
        let query = r#"
            SELECT EXISTS (
                SELECT 1 FROM supply.supply_observations
                WHERE symbol = $1 AND observed_at >= $2 AND observed_at < $3
            )
        "#;

        let row = client
            .query_one(query, &[&symbol.as_str(), &start, &end])
            .await?;
        Ok(row.get(0))
    }

    async fn append_observation(&self, symbol: &Symbol, observation: Observation) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let symbol = sanitize_string(symbol.as_str());

        client
            .execute(
                APPEND_OBSERVATION,
                &[&symbol, &observation.value, &observation.timestamp],
            )
            .await
            .map_err(|e| {
                error!("Failed to append observation for {}: {:?}", symbol, e);
                e
            })?;

        Ok(())
    }

    /// One pooled connection and one prepared statement for the whole batch.
    /// Rows are not wrapped in a transaction so a failing symbol leaves the
    /// others written.
    async fn append_observations(&self, batch: &[(Symbol, Observation)]) -> BatchWriteReport {
        let mut report = BatchWriteReport::default();
        if batch.is_empty() {
            return report;
        }

        let client = match self.pool.get().await {
            Ok(client) => client,
            Err(e) => {
                for (symbol, _) in batch {
                    report.record_failure(symbol.clone(), format!("no connection: {}", e));
                }
                return report;
            },
        };

        let stmt = match client.prepare(APPEND_OBSERVATION).await {
            Ok(stmt) => stmt,
            Err(e) => {
                for (symbol, _) in batch {
                    report.record_failure(symbol.clone(), format!("prepare failed: {}", e));
                }
                return report;
            },
        };

        for (symbol, observation) in batch {
            let sanitized = sanitize_string(symbol.as_str());
            let result = client
                .execute(&stmt, &[&sanitized, &observation.value, &observation.timestamp])
                .await;

            match result {
                Ok(_) => report.written.push(symbol.clone()),
                Err(e) => {
                    error!("Failed to append observation for {}: {:?}", symbol, e);
                    report.record_failure(symbol.clone(), e.to_string());
                },
            }
        }

        report
    }

    async fn replace_observation_on_day(
        &self,
        symbol: &Symbol,
        day: NaiveDate,
        observation: Observation,
    ) -> anyhow::Result<()> {
        let mut client = self.pool.get().await?;
        let (start, end) = day_bounds(day);
        let symbol = sanitize_string(symbol.as_str());

        let tx = client.transaction().await?;
        tx.execute(
            r#"
            DELETE FROM supply.supply_observations
            WHERE symbol = $1 AND observed_at >= $2 AND observed_at < $3
            "#,
            &[&symbol, &start, &end],
        )
        .await?;
        tx.execute(
            APPEND_OBSERVATION,
            &[&symbol, &observation.value, &observation.timestamp],
        )
        .await?;
        tx.commit()
            .await
            .with_context(|| format!("Failed to replace {} observation on {}", symbol, day))?;

        Ok(())
    }

    async fn all_observations(&self, symbol: &Symbol) -> anyhow::Result<Vec<Observation>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT value, observed_at
            FROM supply.supply_observations
            WHERE symbol = $1
            ORDER BY id
        "#;

        let rows = client.query(query, &[&symbol.as_str()]).await?;
        Ok(rows.iter().map(row_to_observation).collect())
    }

    async fn series(&self, symbol: &Symbol) -> anyhow::Result<Option<SupplySeries>> {
        let mut found = self.series_for(std::slice::from_ref(symbol)).await?;
        Ok(found.pop())
    }

    async fn series_for(&self, symbols: &[Symbol]) -> anyhow::Result<Vec<SupplySeries>> {
        if symbols.is_empty() {
            return Ok(vec![]);
        }

        let client = self.pool.get().await?;
        let symbols: Vec<String> = symbols.iter().map(|s| s.as_str().to_string()).collect();
        let query = r#"
            SELECT s.symbol, o.value, o.observed_at
            FROM supply.supply_series s
            LEFT JOIN supply.supply_observations o ON o.symbol = s.symbol
            WHERE s.symbol = ANY($1)
            ORDER BY s.created_at, s.symbol, o.id
        "#;

        let rows = client.query(query, &[&symbols]).await?;
        Ok(group_series_rows(&rows))
    }

    async fn all_series(&self) -> anyhow::Result<Vec<SupplySeries>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT s.symbol, o.value, o.observed_at
            FROM supply.supply_series s
            LEFT JOIN supply.supply_observations o ON o.symbol = s.symbol
            ORDER BY s.created_at, s.symbol, o.id
        "#;

        let rows = client.query(query, &[]).await?;
        Ok(group_series_rows(&rows))
    }

    async fn symbols_with_observation_on_day(&self, day: NaiveDate) -> anyhow::Result<Vec<Symbol>> {
        let client = self.pool.get().await?;
        let (start, end) = day_bounds(day);
        let query = r#"
            SELECT DISTINCT symbol
            FROM supply.supply_observations
            WHERE observed_at >= $1 AND observed_at < $2
            ORDER BY symbol
        "#;

        let rows = client.query(query, &[&start, &end]).await?;
        Ok(rows
            .iter()
            .map(|row| Symbol::new(row.get::<_, &str>("symbol")))
            .collect())
    }

    async fn delete_series(&self, symbol: &Symbol) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM supply.supply_series WHERE symbol = $1",
                &[&symbol.as_str()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== SNAPSHOT BATCHES ====================

#[async_trait]
impl SnapshotStore for PostgresClient {
    async fn has_batch_on_day(&self, day: NaiveDate) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM supply.snapshot_batches WHERE batch_date = $1)",
                &[&day],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn save_batch(&self, batch: &SnapshotBatch) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let coin_count = batch.coins.len() as i32;

        client
            .execute(
                INSERT_BATCH,
                &[&batch.day, &batch.taken_at, &coin_count, &Json(&batch.coins)],
            )
            .await
            .map_err(|e| {
                error!("Failed to save snapshot batch for {}: {:?}", batch.day, e);
                e
            })?;

        Ok(())
    }

    async fn replace_batch_on_day(&self, batch: &SnapshotBatch) -> anyhow::Result<()> {
        let mut client = self.pool.get().await?;
        let coin_count = batch.coins.len() as i32;

        let tx = client.transaction().await?;
        tx.execute(
            "DELETE FROM supply.snapshot_batches WHERE batch_date = $1",
            &[&batch.day],
        )
        .await?;
        tx.execute(
            INSERT_BATCH,
            &[&batch.day, &batch.taken_at, &coin_count, &Json(&batch.coins)],
        )
        .await?;
        tx.commit()
            .await
            .with_context(|| format!("Failed to replace snapshot batch for {}", batch.day))?;

        Ok(())
    }

    async fn latest_batch(&self) -> anyhow::Result<Option<SnapshotBatch>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT batch_date, taken_at, coins
            FROM supply.snapshot_batches
            ORDER BY taken_at DESC, id DESC
            LIMIT 1
        "#;

        let row = client.query_opt(query, &[]).await?;
        Ok(row.map(|r| row_to_batch(&r)))
    }

    async fn batches_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SnapshotBatch>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT batch_date, taken_at, coins
            FROM supply.snapshot_batches
            WHERE taken_at >= $1 AND taken_at <= $2
            ORDER BY taken_at ASC, id ASC
        "#;

        let rows = client.query(query, &[&start, &end]).await?;
        Ok(rows.iter().map(row_to_batch).collect())
    }

    async fn delete_all_batches(&self) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM supply.snapshot_batches", &[])
            .await?;
        Ok(deleted)
    }
}

// ==================== HELPER FUNCTIONS ====================

fn row_to_observation(row: &tokio_postgres::Row) -> Observation {
    Observation {
        value: row.get("value"),
        timestamp: row.get("observed_at"),
    }
}

/// Rows arrive ordered by series; a series without observations yields one
/// row with NULL observation columns.
fn group_series_rows(rows: &[tokio_postgres::Row]) -> Vec<SupplySeries> {
    let mut series: Vec<SupplySeries> = Vec::new();

    for row in rows {
        let symbol = Symbol::new(row.get::<_, &str>("symbol"));
        let value: Option<f64> = row.get("value");
        let observed_at: Option<DateTime<Utc>> = row.get("observed_at");

        let needs_new = series.last().map_or(true, |s| s.symbol != symbol);
        if needs_new {
            series.push(SupplySeries::new(symbol));
        }

        if let (Some(value), Some(timestamp), Some(current)) = (value, observed_at, series.last_mut()) {
            current.observations.push(Observation::new(value, timestamp));
        }
    }

    series
}

fn row_to_batch(row: &tokio_postgres::Row) -> SnapshotBatch {
    let Json(coins): Json<Vec<CoinRecord>> = row.get("coins");
    SnapshotBatch {
        day: row.get("batch_date"),
        taken_at: row.get("taken_at"),
        coins,
    }
}
