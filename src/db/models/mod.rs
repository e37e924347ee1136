mod coin_snapshot;
mod supply_series;
mod symbol;
mod write_report;

pub use coin_snapshot::{ChangeResult, CoinRecord, SnapshotBatch};
pub use supply_series::{latest_observation, Observation, SupplySeries};
pub use symbol::Symbol;
pub use write_report::{BatchWriteReport, WriteFailure};
