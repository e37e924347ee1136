//! Small helpers shared by the stores and the collection cycle.
//!
//! - [`time`] - UTC day boundaries and fractional day arithmetic

mod time;

pub use time::{day_bounds, fractional_days, MILLIS_PER_DAY};

/// Strip null bytes (0x00), which PostgreSQL rejects in text columns.
pub fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}
