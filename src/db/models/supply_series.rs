use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::Symbol;

/// One circulating supply reading for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }

    /// UTC calendar day the reading belongs to.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Supply history of a single symbol (PostgreSQL).
///
/// Observations are kept in insertion order. Readers that need time order
/// must sort themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplySeries {
    pub symbol: Symbol,
    pub observations: Vec<Observation>,
}

impl SupplySeries {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            observations: Vec::new(),
        }
    }

    pub fn has_observation_on_day(&self, day: NaiveDate) -> bool {
        self.observations.iter().any(|o| o.day() == day)
    }

    /// Latest reading by timestamp, ties resolved in favour of the earliest inserted.
    pub fn latest(&self) -> Option<&Observation> {
        latest_observation(&self.observations)
    }

    /// Observations sorted newest first.
    pub fn sorted_desc(&self) -> Vec<Observation> {
        let mut sorted = self.observations.clone();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sorted
    }

    /// One observation per UTC day (the latest of that day), newest first.
    pub fn daily_latest(&self) -> Vec<Observation> {
        let mut per_day: Vec<Observation> = Vec::new();
        for obs in self.sorted_desc() {
            match per_day.last() {
                Some(last) if last.day() == obs.day() => {},
                _ => per_day.push(obs),
            }
        }
        per_day
    }
}

pub fn latest_observation(observations: &[Observation]) -> Option<&Observation> {
    let mut latest: Option<&Observation> = None;
    for obs in observations {
        match latest {
            Some(current) if obs.timestamp <= current.timestamp => {},
            _ => latest = Some(obs),
        }
    }
    latest
}
