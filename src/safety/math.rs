//! Pure numeric building blocks of the aggregator.
//!
//! None of these functions can produce `NaN` for finite inputs; divisions are
//! floored at [`EPSILON`].

use chrono::{DateTime, Utc};

use crate::config::DEFAULT_PRIOR_MEAN;

pub const EPSILON: f64 = 1e-9;
pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Days between `from` and `to`, never negative.
pub fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let ms = (to - from).num_milliseconds() as f64;
    (ms / MS_PER_DAY).max(0.0)
}

/// Half-life weight of an observation made at `observed` when read at `now`.
///
/// `1.0` for zero elapsed time, `0.5` after one half-life, monotonically
/// decreasing afterwards.
pub fn decay_weight(observed: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let half_life = if half_life_days.is_finite() {
        half_life_days.max(EPSILON)
    } else {
        return 1.0;
    };
    let elapsed = elapsed_days(observed, now);
    if elapsed == 0.0 {
        return 1.0;
    }
    2f64.powf(-elapsed / half_life)
}

/// Blends an observed mean backed by `n` observations with a prior backed by
/// `prior_n` pseudo-observations.
pub fn bayesian_shrink(mean: f64, n: f64, prior_mean: f64, prior_n: f64) -> f64 {
    let n = if n.is_finite() { n.max(0.0) } else { 0.0 };
    let prior_n = if prior_n.is_finite() { prior_n.max(0.0) } else { 0.0 };
    let total = prior_n + n;
    if total < EPSILON {
        return prior_mean;
    }
    (prior_mean * prior_n + mean * n) / total
}

/// Forces a score into `[1, 5]`; non-finite scores fall back to the neutral 3.
pub fn clamp_mean(value: f64) -> f64 {
    if !value.is_finite() {
        return DEFAULT_PRIOR_MEAN;
    }
    value.clamp(MIN_RATING, MAX_RATING)
}

pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn zero_elapsed_weighs_one() {
        let now = Utc::now();
        assert_eq!(decay_weight(now, now, 21.0), 1.0);
    }

    #[test]
    fn one_half_life_weighs_half() {
        let now = Utc::now();
        let weight = decay_weight(now - Duration::days(21), now, 21.0);
        assert!((weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn future_observations_do_not_grow() {
        let now = Utc::now();
        assert_eq!(decay_weight(now + Duration::days(3), now, 21.0), 1.0);
    }

    #[test]
    fn shrink_limits() {
        assert_eq!(bayesian_shrink(4.5, 0.0, 3.0, 5.0), 3.0);
        assert!((bayesian_shrink(4.5, 1e9, 3.0, 5.0) - 4.5).abs() < 1e-6);
        assert_eq!(bayesian_shrink(4.5, 0.0, 3.0, 0.0), 3.0);
    }

    #[test]
    fn clamp_handles_non_finite() {
        assert_eq!(clamp_mean(f64::NAN), 3.0);
        assert_eq!(clamp_mean(f64::INFINITY), 3.0);
        assert_eq!(clamp_mean(-2.0), 1.0);
        assert_eq!(clamp_mean(9.0), 5.0);
        assert_eq!(clamp_mean(2.2), 2.2);
    }
}
