//! Community safety ratings: time-decayed, Bayesian-shrunk per-segment scores.

mod math;
mod record;
mod store;

use std::collections::HashMap;

pub use math::{EPSILON, bayesian_shrink, clamp_mean, decay_weight, elapsed_days};
pub use record::{AggregateRecord, AggregateView, BaselineRecord, TagShare};
pub use store::{RatingStore, load_baseline};

/// Read access to current segment scores, as consumed by routing and
/// route comparison.
pub trait SegmentScores {
    /// Current mean for `segment_id`, or `None` when nothing is known.
    fn score(&self, segment_id: &str) -> Option<f64>;

    fn score_or(&self, segment_id: &str, default: f64) -> f64 {
        self.score(segment_id).map_or(default, clamp_mean)
    }
}

impl SegmentScores for HashMap<String, f64> {
    fn score(&self, segment_id: &str) -> Option<f64> {
        self.get(segment_id).copied()
    }
}
