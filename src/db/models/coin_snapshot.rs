use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::Symbol;

/// Supply change against a historical reference.
///
/// Both fields are `None` when no usable reference exists. `estimated` marks
/// results projected from the latest reading instead of a matched reference.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeResult {
    pub change: Option<f64>,
    pub reference_value: Option<f64>,
    #[serde(default)]
    pub estimated: bool,
}

impl ChangeResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn observed(change: f64, reference_value: f64) -> Self {
        Self {
            change: Some(change),
            reference_value: Some(reference_value),
            estimated: false,
        }
    }

    pub fn estimated(change: f64, reference_value: f64) -> Self {
        Self {
            change: Some(change),
            reference_value: Some(reference_value),
            estimated: true,
        }
    }

    pub fn is_none(&self) -> bool {
        self.change.is_none()
    }

    /// Change relative to the reference, in percent.
    pub fn percentage(&self) -> Option<f64> {
        match (self.change, self.reference_value) {
            (Some(change), Some(reference)) if reference > 0.0 => Some(change / reference * 100.0),
            _ => None,
        }
    }
}

/// Denormalized daily record of one asset.
///
/// Population: collection cycle, once per day, after the supply series
/// have been written.
///
/// Query Patterns:
///   - "Page through today's ranked assets"
///   - "Price/supply history of symbol X over N days"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinRecord {
    pub rank: u32,
    pub provider_id: String,
    pub name: String,
    pub symbol: Symbol,
    pub icon: Option<String>,
    pub price: Option<f64>,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub circulating_supply: f64,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,
    pub supply_change_1d: ChangeResult,
    pub supply_change_1w: ChangeResult,
    pub supply_change_1m: ChangeResult,
}

/// All coin records produced by one collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBatch {
    pub day: NaiveDate,
    pub taken_at: DateTime<Utc>,
    pub coins: Vec<CoinRecord>,
}

impl SnapshotBatch {
    pub fn new(taken_at: DateTime<Utc>, coins: Vec<CoinRecord>) -> Self {
        Self {
            day: taken_at.date_naive(),
            taken_at,
            coins,
        }
    }

    pub fn coin(&self, symbol: &Symbol) -> Option<&CoinRecord> {
        self.coins.iter().find(|c| &c.symbol == symbol)
    }
}
