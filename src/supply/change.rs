use chrono::{DateTime, Duration, Utc};

use crate::config::ChangePolicy;
use crate::db::models::{latest_observation, ChangeResult, Observation};
use crate::utils::fractional_days;

/// Supply changes over the daily, weekly and monthly windows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowChanges {
    pub day: ChangeResult,
    pub week: ChangeResult,
    pub month: ChangeResult,
}

/// Nearest-prior change computation over a possibly sparse series.
#[derive(Debug, Clone, Default)]
pub struct SupplyChangeCalculator {
    policy: ChangePolicy,
}

impl SupplyChangeCalculator {
    pub fn new(policy: ChangePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ChangePolicy {
        &self.policy
    }

    /// Change of `current_value` against the reading nearest to
    /// `now - window_days` (not after it).
    ///
    /// Short windows reject references further than the acceptance window
    /// from the target. The extrapolation window falls back to a projection
    /// from the most recent reading when no reference matches.
    pub fn change_over(
        &self,
        observations: &[Observation],
        current_value: f64,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> ChangeResult {
        if observations.is_empty() || !current_value.is_finite() || current_value <= 0.0 {
            return ChangeResult::none();
        }

        let target = now - Duration::days(i64::from(window_days));
        let mut candidate = nearest_prior(observations, target);

        if window_days <= self.policy.short_window_max_days {
            let max_distance = Duration::days(i64::from(self.policy.acceptance_window_days));
            candidate = candidate.filter(|obs| target - obs.timestamp <= max_distance);
        }

        let Some(reference) = candidate else {
            if window_days == self.policy.extrapolation_window_days {
                return self.extrapolate(observations, current_value, window_days, now);
            }
            return ChangeResult::none();
        };

        if reference.value <= 0.0 {
            return ChangeResult::none();
        }

        ChangeResult::observed((current_value - reference.value).round(), reference.value)
    }

    /// Changes over the configured day, week and month windows.
    pub fn window_changes(
        &self,
        observations: &[Observation],
        current_value: f64,
        now: DateTime<Utc>,
    ) -> WindowChanges {
        WindowChanges {
            day: self.change_over(observations, current_value, self.policy.day_window_days, now),
            week: self.change_over(observations, current_value, self.policy.week_window_days, now),
            month: self.change_over(observations, current_value, self.policy.month_window_days, now),
        }
    }

    fn extrapolate(
        &self,
        observations: &[Observation],
        current_value: f64,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> ChangeResult {
        let Some(latest) = latest_observation(observations) else {
            return ChangeResult::none();
        };

        let elapsed_days = fractional_days(now, latest.timestamp).max(1.0);
        let rate = (current_value - latest.value) / elapsed_days;
        let estimated_change = rate * f64::from(window_days);
        let past = current_value - estimated_change;

        if past > 0.0 {
            ChangeResult::estimated(estimated_change.round(), past.round())
        } else {
            ChangeResult::none()
        }
    }
}

/// Observation at or before `target` with the smallest distance to it.
/// Ties go to the earliest inserted.
pub fn nearest_prior(observations: &[Observation], target: DateTime<Utc>) -> Option<&Observation> {
    let mut best: Option<&Observation> = None;
    for obs in observations.iter().filter(|o| o.timestamp <= target) {
        match best {
            Some(current) if target - obs.timestamp >= target - current.timestamp => {},
            _ => best = Some(obs),
        }
    }
    best
}

/// `change / reference * 100`, or `None` without a positive reference.
pub fn percentage_change(change: f64, reference: f64) -> Option<f64> {
    if reference > 0.0 {
        Some(change / reference * 100.0)
    } else {
        None
    }
}
