use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

pub const MILLIS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Half-open `[start, end)` bounds of a UTC calendar day.
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

/// Absolute distance between two instants, in (fractional) days.
pub fn fractional_days(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (a - b).num_milliseconds().abs() as f64 / MILLIS_PER_DAY
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_day_bounds_cover_whole_utc_day() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let (start, end) = day_bounds(day);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_fractional_days_is_symmetric() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let b = a + Duration::hours(36);
        assert_eq!(fractional_days(a, b), 1.5);
        assert_eq!(fractional_days(b, a), 1.5);
    }
}
