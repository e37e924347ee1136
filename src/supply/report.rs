//! Read-side views over stored supply series.
//!
//! Everything here is a pure function of the series and a reference
//! instant, so callers decide what "now" is.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::config::ChangePolicy;
use crate::db::models::{latest_observation, Observation, SupplySeries, Symbol};
use crate::supply::change::{nearest_prior, percentage_change};
use crate::utils::fractional_days;

/// Number of entries in the largest/smallest series rankings
const RANKING_SIZE: usize = 10;

/// A stored reading matched to a lookback target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferencePoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&Observation> for ReferencePoint {
    fn from(obs: &Observation) -> Self {
        Self {
            value: obs.value,
            timestamp: obs.timestamp,
        }
    }
}

/// Latest value of a series and its nearest-prior readings at 1d/1w/1m.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyDetails {
    pub symbol: Symbol,
    pub total_records: usize,
    pub latest_supply: Option<f64>,
    pub day: Option<ReferencePoint>,
    pub week: Option<ReferencePoint>,
    pub month: Option<ReferencePoint>,
}

/// [`SupplyDetails`] plus the full history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinSupplyDetails {
    #[serde(flatten)]
    pub details: SupplyDetails,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowComparison {
    pub absolute: f64,
    pub percentage: f64,
    pub old_value: f64,
    pub date: DateTime<Utc>,
    /// Distance between the matched reading and the lookback target
    pub diff_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonEntry {
    pub symbol: Symbol,
    pub latest_supply: f64,
    pub day: Option<WindowComparison>,
    pub week: Option<WindowComparison>,
    pub month: Option<WindowComparison>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesSize {
    pub symbol: Symbol,
    pub records: usize,
}

/// Coverage of the stored history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesStatistics {
    pub total_series: usize,
    /// Series whose changes cannot be computed yet
    pub single_record: usize,
    pub multi_record: usize,
    pub written_today: usize,
    pub largest: Vec<SeriesSize>,
    pub smallest: Vec<SeriesSize>,
}

fn window_targets(policy: &ChangePolicy, now: DateTime<Utc>) -> [DateTime<Utc>; 3] {
    [
        policy.day_window_days,
        policy.week_window_days,
        policy.month_window_days,
    ]
    .map(|days| now - Duration::days(i64::from(days)))
}

pub fn supply_details(series: &SupplySeries, policy: &ChangePolicy, now: DateTime<Utc>) -> SupplyDetails {
    let [day, week, month] = window_targets(policy, now)
        .map(|target| nearest_prior(&series.observations, target).map(ReferencePoint::from));

    SupplyDetails {
        symbol: series.symbol.clone(),
        total_records: series.observations.len(),
        latest_supply: series.latest().map(|o| o.value),
        day,
        week,
        month,
    }
}

pub fn coin_supply_details(
    series: &SupplySeries,
    policy: &ChangePolicy,
    now: DateTime<Utc>,
) -> CoinSupplyDetails {
    CoinSupplyDetails {
        details: supply_details(series, policy, now),
        observations: series.sorted_desc(),
    }
}

/// Absolute and percentage change of the latest reading per window.
/// Series without observations produce no entry.
pub fn comparison_entry(
    series: &SupplySeries,
    policy: &ChangePolicy,
    now: DateTime<Utc>,
) -> Option<ComparisonEntry> {
    let latest = latest_observation(&series.observations)?.value;

    let [day, week, month] = window_targets(policy, now).map(|target| {
        let reference = nearest_prior(&series.observations, target)?;
        let absolute = latest - reference.value;
        let percentage = percentage_change(absolute, reference.value)?;
        Some(WindowComparison {
            absolute,
            percentage,
            old_value: reference.value,
            date: reference.timestamp,
            diff_days: fractional_days(target, reference.timestamp),
        })
    });

    Some(ComparisonEntry {
        symbol: series.symbol.clone(),
        latest_supply: latest,
        day,
        week,
        month,
    })
}

pub fn series_statistics(all: &[SupplySeries], today: NaiveDate) -> SeriesStatistics {
    let single_record = all.iter().filter(|s| s.observations.len() == 1).count();
    let multi_record = all.iter().filter(|s| s.observations.len() > 1).count();
    let written_today = all.iter().filter(|s| s.has_observation_on_day(today)).count();

    let mut sizes: Vec<SeriesSize> = all
        .iter()
        .map(|s| SeriesSize {
            symbol: s.symbol.clone(),
            records: s.observations.len(),
        })
        .collect();

    // Stable sorts keep creation order among equal sizes
    sizes.sort_by(|a, b| b.records.cmp(&a.records));
    let largest = sizes.iter().take(RANKING_SIZE).cloned().collect();
    sizes.sort_by(|a, b| a.records.cmp(&b.records));
    let smallest = sizes.into_iter().take(RANKING_SIZE).collect();

    SeriesStatistics {
        total_series: all.len(),
        single_record,
        multi_record,
        written_today,
        largest,
        smallest,
    }
}
