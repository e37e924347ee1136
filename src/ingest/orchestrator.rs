use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::IngestionPolicy;
use crate::db::models::{CoinRecord, Observation, SnapshotBatch, Symbol, WriteFailure};
use crate::db::{SnapshotStore, SupplySeriesStore};
use crate::ingest::guard::DayGuard;
use crate::ingest::resolver::SymbolMap;
use crate::provider::{MarketDataProvider, ProviderError, RawAsset};
use crate::supply::SupplyChangeCalculator;

/// Stages of one collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleState {
    Idle,
    Paginating,
    Resolving,
    Backfilling,
    Persisting,
    Done,
    Skipped,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Paginating => "paginating",
            Self::Resolving => "resolving",
            Self::Backfilling => "backfilling",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Errors that abort a cycle. Partial failures are reported in
/// [`CycleSummary`] instead.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("no asset with a usable circulating supply in this cycle")]
    NoUsableAssets,

    #[error("provider unreachable: all {pages} pages failed, last error: {cause}")]
    ProviderUnreachable { pages: u32, cause: ProviderError },

    #[error("cycle cancelled")]
    Cancelled,

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleCounts {
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub assets_fetched: usize,
    /// Distinct symbols with a usable supply in the listing pages
    pub valid_assets: usize,
    pub missing_supply: usize,
    pub backfill_attempts: usize,
    pub backfill_recovered: usize,
    pub written: usize,
    pub already_present: usize,
    pub failed_writes: usize,
    pub snapshot_coins: usize,
}

/// Outcome of one collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub success: bool,
    pub message: String,
    pub day: NaiveDate,
    pub state: CycleState,
    pub counts: CycleCounts,
    pub failures: Vec<WriteFailure>,
}

impl CycleSummary {
    fn skipped(day: NaiveDate, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            day,
            state: CycleState::Skipped,
            counts: CycleCounts::default(),
            failures: Vec::new(),
        }
    }
}

/// Listing entry after symbol resolution, one per symbol.
#[derive(Debug, Clone)]
struct ResolvedAsset {
    symbol: Symbol,
    asset: RawAsset,
    supply: Option<f64>,
}

/// Runs collection cycles: paginated fetch, symbol resolution, supply
/// backfill, then the daily observation write and snapshot batch.
pub struct IngestionOrchestrator {
    provider: Arc<dyn MarketDataProvider>,
    series: Arc<dyn SupplySeriesStore>,
    snapshots: Arc<dyn SnapshotStore>,
    policy: IngestionPolicy,
    calculator: SupplyChangeCalculator,
    guard: DayGuard,
}

impl IngestionOrchestrator {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        series: Arc<dyn SupplySeriesStore>,
        snapshots: Arc<dyn SnapshotStore>,
        policy: IngestionPolicy,
    ) -> Self {
        let calculator = SupplyChangeCalculator::new(policy.changes.clone());
        Self {
            provider,
            series,
            snapshots,
            policy,
            calculator,
            guard: DayGuard::new(),
        }
    }

    pub fn guard(&self) -> &DayGuard {
        &self.guard
    }

    pub fn policy(&self) -> &IngestionPolicy {
        &self.policy
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleSummary, CycleError> {
        self.run_cycle_at(Utc::now(), cancel).await
    }

    /// Runs one cycle as of `now`. Observations are stamped with `now` and
    /// the UTC day of `now` keys the idempotence checks.
    pub async fn run_cycle_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleSummary, CycleError> {
        let day = now.date_naive();
        let started = Instant::now();

        let Some(_permit) = self.guard.try_acquire(day) else {
            info!("Collection cycle for {} already running, skipping", day);
            return Ok(CycleSummary::skipped(day, "cycle already running"));
        };

        if self.snapshots.has_batch_on_day(day).await? {
            info!("Snapshot batch for {} already exists, skipping cycle", day);
            return Ok(CycleSummary::skipped(day, "snapshot batch already exists for today"));
        }

        let mut counts = CycleCounts::default();
        let mut state = CycleState::Idle;

        transition(day, &mut state, CycleState::Paginating);
        let assets = self.paginate(&mut counts, cancel).await?;

        transition(day, &mut state, CycleState::Resolving);
        let listing = match interruptible(self.provider.fetch_markets_listing(), cancel).await? {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Markets listing unavailable, using page symbols: {}", e);
                Vec::new()
            },
        };
        let symbols = SymbolMap::resolve(&assets, &listing);
        let resolved = dedupe_by_symbol(&assets, &symbols);
        let (valid, missing) = partition_by_supply(&resolved);
        counts.valid_assets = valid.len();
        counts.missing_supply = missing.len();
        info!(
            "Resolved {} assets into {} symbols ({} with supply, {} missing)",
            assets.len(),
            resolved.len(),
            valid.len(),
            missing.len()
        );

        transition(day, &mut state, CycleState::Backfilling);
        let backfilled = self
            .backfill(&missing, &valid, &symbols, &mut counts, cancel)
            .await?;

        let mut to_write: Vec<(Symbol, f64)> = valid
            .iter()
            .filter_map(|r| r.supply.map(|s| (r.symbol.clone(), s)))
            .collect();
        to_write.extend(backfilled.iter().map(|(symbol, supply)| (symbol.clone(), *supply)));

        if to_write.is_empty() {
            let message = CycleError::NoUsableAssets.to_string();
            error!("Collection cycle for {} failed: {}", day, message);
            return Ok(CycleSummary {
                success: false,
                message,
                day,
                state,
                counts,
                failures: Vec::new(),
            });
        }

        transition(day, &mut state, CycleState::Persisting);
        let failures = self
            .persist_observations(&to_write, now, &mut counts, cancel)
            .await?;

        if !failures.is_empty() {
            transition(day, &mut state, CycleState::Done);
            let message = format!(
                "{} observations failed to persist, snapshot deferred to the next run ({} written, {} already present)",
                failures.len(),
                counts.written,
                counts.already_present
            );
            warn!("Collection cycle for {}: {}", day, message);
            return Ok(CycleSummary {
                success: false,
                message,
                day,
                state,
                counts,
                failures,
            });
        }

        let backfilled_supply: FxHashMap<Symbol, f64> = backfilled.into_iter().collect();
        let saved = self
            .save_snapshot(&resolved, &backfilled_supply, now, &mut counts)
            .await;

        transition(day, &mut state, CycleState::Done);
        let (success, message) = match saved {
            Ok(()) => (
                true,
                format!(
                    "Saved {} new observations ({} already present), snapshot of {} coins",
                    counts.written, counts.already_present, counts.snapshot_coins
                ),
            ),
            Err(e) => {
                error!("Failed to save snapshot batch for {}: {:#}", day, e);
                (false, format!("snapshot batch not saved: {:#}", e))
            },
        };

        info!(
            "Collection cycle for {} finished in {:?}: {}",
            day,
            started.elapsed(),
            message
        );

        Ok(CycleSummary {
            success,
            message,
            day,
            state,
            counts,
            failures,
        })
    }

    /// Fetches every configured page in order. A failed page is skipped.
    async fn paginate(
        &self,
        counts: &mut CycleCounts,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawAsset>, CycleError> {
        let mut assets: Vec<RawAsset> = Vec::new();
        let mut last_error: Option<ProviderError> = None;
        let page_count = self.policy.page_count;

        for page in 1..=page_count {
            check_cancelled(cancel)?;

            match interruptible(self.provider.fetch_page(page), cancel).await? {
                Ok(batch) => {
                    counts.pages_fetched += 1;
                    info!("Page {}/{}: {} assets", page, page_count, batch.len());
                    assets.extend(batch);
                    if page < page_count {
                        pause(self.policy.page_delay(), cancel).await?;
                    }
                },
                Err(e) => {
                    counts.pages_failed += 1;
                    error!("Page {}/{} failed, skipping: {}", page, page_count, e);
                    last_error = Some(e);
                    if page < page_count {
                        pause(self.policy.page_failure_delay(), cancel).await?;
                    }
                },
            }
        }

        counts.assets_fetched = assets.len();

        if counts.pages_fetched == 0 {
            if let Some(cause) = last_error {
                return Err(CycleError::ProviderUnreachable {
                    pages: counts.pages_failed,
                    cause,
                });
            }
        }

        Ok(assets)
    }

    /// Per-asset detail lookups for assets without a usable supply, capped
    /// by policy, plus one extra attempt for each important symbol still
    /// missing afterwards.
    async fn backfill(
        &self,
        missing: &[ResolvedAsset],
        valid: &[ResolvedAsset],
        symbols: &SymbolMap,
        counts: &mut CycleCounts,
        cancel: &CancellationToken,
    ) -> Result<Vec<(Symbol, f64)>, CycleError> {
        let mut recovered: Vec<(Symbol, f64)> = Vec::new();

        if missing.len() > self.policy.backfill_cap {
            warn!(
                "{} assets missing supply, backfilling the first {}",
                missing.len(),
                self.policy.backfill_cap
            );
        }

        for entry in missing.iter().take(self.policy.backfill_cap) {
            check_cancelled(cancel)?;
            counts.backfill_attempts += 1;
            if let Some(supply) = self.lookup_supply(&entry.asset.id, &entry.symbol, cancel).await? {
                recovered.push((entry.symbol.clone(), supply));
            }
        }

        let covered: FxHashSet<Symbol> = valid
            .iter()
            .map(|r| r.symbol.clone())
            .chain(recovered.iter().map(|(s, _)| s.clone()))
            .collect();

        for important in &self.policy.important_symbols {
            let symbol = Symbol::new(important.symbol.as_str());
            if covered.contains(&symbol) {
                continue;
            }

            check_cancelled(cancel)?;
            let id = symbols
                .id_for(&symbol)
                .unwrap_or(important.fallback_id.as_str())
                .to_string();
            info!("Important symbol {} has no supply yet, looking up {}", symbol, id);
            counts.backfill_attempts += 1;
            if let Some(supply) = self.lookup_supply(&id, &symbol, cancel).await? {
                recovered.push((symbol, supply));
            }
        }

        counts.backfill_recovered = recovered.len();
        info!(
            "Backfill recovered {} of {} lookups",
            counts.backfill_recovered, counts.backfill_attempts
        );
        Ok(recovered)
    }

    async fn lookup_supply(
        &self,
        asset_id: &str,
        symbol: &Symbol,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, CycleError> {
        match interruptible(self.provider.fetch_detail(asset_id), cancel).await? {
            Ok(detail) => {
                let supply = detail.valid_supply();
                match supply {
                    Some(value) => debug!("Backfilled {} ({}): {}", symbol, asset_id, value),
                    None => warn!("Detail for {} ({}) has no usable supply", symbol, asset_id),
                }
                pause(self.policy.detail_delay(), cancel).await?;
                Ok(supply)
            },
            Err(e) => {
                warn!("Detail lookup for {} ({}) failed: {}", symbol, asset_id, e);
                pause(self.policy.detail_failure_delay(), cancel).await?;
                Ok(None)
            },
        }
    }

    /// Gates every symbol on today's observation, then writes the rest in
    /// one grouped append. Returns the per-symbol failures.
    async fn persist_observations(
        &self,
        to_write: &[(Symbol, f64)],
        now: DateTime<Utc>,
        counts: &mut CycleCounts,
        cancel: &CancellationToken,
    ) -> Result<Vec<WriteFailure>, CycleError> {
        let day = now.date_naive();
        let mut failures: Vec<WriteFailure> = Vec::new();
        let mut queue: Vec<(Symbol, Observation)> = Vec::new();

        for (symbol, supply) in to_write {
            match self.series.has_observation_on_day(symbol, day).await {
                Ok(true) => counts.already_present += 1,
                Ok(false) => queue.push((symbol.clone(), Observation::new(*supply, now))),
                Err(e) => {
                    error!("Idempotence check for {} failed: {:#}", symbol, e);
                    failures.push(WriteFailure {
                        symbol: symbol.clone(),
                        reason: format!("{:#}", e),
                    });
                },
            }
        }

        check_cancelled(cancel)?;

        let report = self.series.append_observations(&queue).await;
        counts.written = report.written.len();
        failures.extend(report.failed);
        counts.failed_writes = failures.len();

        info!(
            "Persisted {} observations for {} ({} already present, {} failed)",
            counts.written, day, counts.already_present, counts.failed_writes
        );
        Ok(failures)
    }

    /// Builds the day's coin records in listing order and saves the batch.
    async fn save_snapshot(
        &self,
        resolved: &[ResolvedAsset],
        backfilled: &FxHashMap<Symbol, f64>,
        now: DateTime<Utc>,
        counts: &mut CycleCounts,
    ) -> anyhow::Result<()> {
        let symbols: Vec<Symbol> = resolved.iter().map(|r| r.symbol.clone()).collect();
        // Today's readings are the current values, never their own reference
        let today = now.date_naive();
        let history: FxHashMap<Symbol, Vec<Observation>> = self
            .series
            .series_for(&symbols)
            .await?
            .into_iter()
            .map(|s| {
                let prior = s
                    .observations
                    .into_iter()
                    .filter(|o| o.day() != today)
                    .collect();
                (s.symbol, prior)
            })
            .collect();

        let mut coins: Vec<CoinRecord> = Vec::new();
        for entry in resolved {
            let Some(supply) = entry.supply.or_else(|| backfilled.get(&entry.symbol).copied()) else {
                continue;
            };
            if supply <= 0.0 {
                continue;
            }

            let observations = history.get(&entry.symbol).map(Vec::as_slice).unwrap_or(&[]);
            let changes = self.calculator.window_changes(observations, supply, now);

            coins.push(CoinRecord {
                rank: coins.len() as u32 + 1,
                provider_id: entry.asset.id.clone(),
                name: entry.asset.name.clone(),
                symbol: entry.symbol.clone(),
                icon: entry.asset.image.clone(),
                price: entry.asset.current_price,
                volume_24h: entry.asset.total_volume,
                market_cap: entry.asset.market_cap,
                circulating_supply: supply,
                total_supply: entry.asset.total_supply.or(Some(supply)),
                max_supply: entry.asset.max_supply,
                supply_change_1d: changes.day,
                supply_change_1w: changes.week,
                supply_change_1m: changes.month,
            });
        }

        let batch = SnapshotBatch::new(now, coins);
        self.snapshots.save_batch(&batch).await?;
        counts.snapshot_coins = batch.coins.len();
        info!("Saved snapshot batch for {} with {} coins", batch.day, batch.coins.len());
        Ok(())
    }
}

fn transition(day: NaiveDate, state: &mut CycleState, next: CycleState) {
    info!("Collection cycle {}: {} -> {}", day, state, next);
    *state = next;
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), CycleError> {
    if cancel.is_cancelled() {
        warn!("Collection cycle cancelled");
        return Err(CycleError::Cancelled);
    }
    Ok(())
}

/// Sleeps for `duration` unless the cycle is cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), CycleError> {
    if duration.is_zero() {
        return check_cancelled(cancel);
    }

    tokio::select! {
        _ = cancel.cancelled() => {
            warn!("Collection cycle cancelled while waiting");
            Err(CycleError::Cancelled)
        },
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Runs a provider call unless the cycle is cancelled first.
async fn interruptible<T>(
    call: impl Future<Output = T>,
    cancel: &CancellationToken,
) -> Result<T, CycleError> {
    tokio::select! {
        _ = cancel.cancelled() => {
            warn!("Collection cycle cancelled during a provider call");
            Err(CycleError::Cancelled)
        },
        value = call => Ok(value),
    }
}

/// One entry per symbol in first-seen order. A later entry replaces the
/// kept one only when the kept one has no usable supply and the later does.
fn dedupe_by_symbol(assets: &[RawAsset], symbols: &SymbolMap) -> Vec<ResolvedAsset> {
    let mut resolved: Vec<ResolvedAsset> = Vec::new();
    let mut index: FxHashMap<Symbol, usize> = FxHashMap::default();

    for asset in assets {
        let Some(symbol) = symbols.symbol_for(&asset.id) else {
            continue;
        };
        let entry = ResolvedAsset {
            symbol: symbol.clone(),
            asset: asset.clone(),
            supply: asset.valid_supply(),
        };

        match index.get(symbol) {
            None => {
                index.insert(symbol.clone(), resolved.len());
                resolved.push(entry);
            },
            Some(&i) => {
                if resolved[i].supply.is_none() && entry.supply.is_some() {
                    resolved[i] = entry;
                }
            },
        }
    }

    resolved
}

fn partition_by_supply(resolved: &[ResolvedAsset]) -> (Vec<ResolvedAsset>, Vec<ResolvedAsset>) {
    resolved.iter().cloned().partition(|r| r.supply.is_some())
}
