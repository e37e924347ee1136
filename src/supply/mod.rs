//! Supply change metrics and read-side reports.
//!
//! - [`change`] - nearest-prior change computation with monthly extrapolation
//! - [`report`] - details, comparison and coverage views over stored series

pub mod change;
pub mod report;

pub use change::{nearest_prior, percentage_change, SupplyChangeCalculator, WindowChanges};
pub use report::{
    CoinSupplyDetails, ComparisonEntry, ReferencePoint, SeriesSize, SeriesStatistics, SupplyDetails,
    WindowComparison,
};
