use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rustc_hash::FxHashSet;

/// In-process single-flight guard keyed by UTC day.
///
/// At most one collection cycle per day holds a permit at a time.
#[derive(Debug, Clone, Default)]
pub struct DayGuard {
    running: Arc<Mutex<FxHashSet<NaiveDate>>>,
}

impl DayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `day`. Returns `None` when another cycle already holds it.
    pub fn try_acquire(&self, day: NaiveDate) -> Option<DayPermit> {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if !running.insert(day) {
            return None;
        }

        Some(DayPermit {
            day,
            running: self.running.clone(),
        })
    }

    pub fn is_running(&self, day: NaiveDate) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&day)
    }
}

/// Releases its day when dropped.
#[derive(Debug)]
pub struct DayPermit {
    day: NaiveDate,
    running: Arc<Mutex<FxHashSet<NaiveDate>>>,
}

impl DayPermit {
    pub fn day(&self) -> NaiveDate {
        self.day
    }
}

impl Drop for DayPermit {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.day);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    #[test]
    fn test_second_acquire_for_same_day_fails() {
        let guard = DayGuard::new();
        let permit = guard.try_acquire(day(1)).unwrap();

        assert!(guard.try_acquire(day(1)).is_none());
        assert!(guard.try_acquire(day(2)).is_some());
        assert_eq!(permit.day(), day(1));
    }

    #[test]
    fn test_drop_releases_day() {
        let guard = DayGuard::new();
        {
            let _permit = guard.try_acquire(day(3)).unwrap();
            assert!(guard.is_running(day(3)));
        }
        assert!(!guard.is_running(day(3)));
        assert!(guard.try_acquire(day(3)).is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let guard = DayGuard::new();
        let other = guard.clone();
        let _permit = guard.try_acquire(day(4)).unwrap();
        assert!(other.try_acquire(day(4)).is_none());
    }
}
