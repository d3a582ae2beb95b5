use std::collections::HashSet;

use serde::Serialize;

use crate::config::{DEFAULT_PRIOR_MEAN, EngineConfig};
use crate::graph::Route;
use crate::safety::{EPSILON, SegmentScores};
use crate::submission::TravelMode;

/// What choosing the alternative route buys and costs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteComparison {
    /// Low-rated segments of the base route that the alternative leaves out.
    pub avoided_low_rated_count: usize,
    pub base_low_rated_count: usize,
    pub alt_low_rated_count: usize,
    pub overhead_percent: f64,
    pub eta_delta_minutes: f64,
}

pub fn is_low_rated<S: SegmentScores + ?Sized>(
    scores: &S,
    segment_id: &str,
    threshold: f64,
) -> bool {
    scores.score_or(segment_id, DEFAULT_PRIOR_MEAN) < threshold
}

pub fn speed_mps(mode: TravelMode, config: &EngineConfig) -> f64 {
    match mode {
        TravelMode::Walk => config.walk_speed_mps,
        TravelMode::Bike => config.bike_speed_mps,
    }
}

/// Compares a primary route with its alternative under the current scores.
pub fn summarize<S: SegmentScores + ?Sized>(
    base: &Route,
    alt: &Route,
    scores: &S,
    mode: TravelMode,
    config: &EngineConfig,
) -> RouteComparison {
    let threshold = config.low_rated_threshold;
    let base_low = low_rated_ids(base, scores, threshold);
    let alt_low = low_rated_ids(alt, scores, threshold);
    let alt_ids: HashSet<&str> = alt.segment_ids.iter().map(String::as_str).collect();

    let extra_m = alt.total_length_m - base.total_length_m;
    let overhead_percent = if base.total_length_m.abs() < EPSILON {
        0.0
    } else {
        extra_m / base.total_length_m * 100.0
    };
    let speed = speed_mps(mode, config).max(EPSILON);

    RouteComparison {
        avoided_low_rated_count: base_low.iter().filter(|id| !alt_ids.contains(*id)).count(),
        base_low_rated_count: base_low.len(),
        alt_low_rated_count: alt_low.len(),
        overhead_percent: finite(overhead_percent),
        eta_delta_minutes: finite(extra_m / speed / 60.0),
    }
}

fn low_rated_ids<'a, S: SegmentScores + ?Sized>(
    route: &'a Route,
    scores: &S,
    threshold: f64,
) -> HashSet<&'a str> {
    route
        .segment_ids
        .iter()
        .map(String::as_str)
        .filter(|id| is_low_rated(scores, id, threshold))
        .collect()
}

fn finite(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
