use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::math::{EPSILON, bayesian_shrink, clamp_mean, decay_weight, finite_or_zero};
use crate::config::EngineConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagShare {
    pub tag: String,
    pub proportion: f64,
}

/// Historical aggregate used to seed a record before any live submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub mean: f64,
    pub n_eff: f64,
    #[serde(default)]
    pub tags: HashMap<String, u32>,
    #[serde(default)]
    pub delta_30d: f64,
}

/// The fields a consuming UI needs for one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateView {
    pub mean: f64,
    pub n_eff: f64,
    pub delta_30d: f64,
    pub top_tags: Vec<TagShare>,
    /// Share of the estimate carried by observations rather than the prior.
    pub confidence: f64,
}

/// Running safety estimate for one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRecord {
    pub mean: f64,
    pub sum_w: f64,
    pub n_eff: f64,
    pub tag_counts: HashMap<String, u32>,
    pub top_tags: Vec<TagShare>,
    pub delta_30d: f64,
    pub updated: DateTime<Utc>,
    window_sum: f64,
    window_weight: f64,
}

impl AggregateRecord {
    pub fn new(now: DateTime<Utc>, config: &EngineConfig) -> Self {
        Self {
            mean: clamp_mean(config.prior_mean),
            sum_w: 0.0,
            n_eff: 0.0,
            tag_counts: HashMap::new(),
            top_tags: Vec::new(),
            delta_30d: 0.0,
            updated: now,
            window_sum: 0.0,
            window_weight: 0.0,
        }
    }

    pub fn from_baseline(
        baseline: &BaselineRecord,
        now: DateTime<Utc>,
        config: &EngineConfig,
    ) -> Self {
        let mean = clamp_mean(baseline.mean);
        let sum_w = finite_or_zero(baseline.n_eff).max(0.0);
        let window_weight = sum_w.min(config.window_max_weight);

        let mut record = Self {
            mean,
            sum_w,
            n_eff: sum_w,
            tag_counts: baseline.tags.clone(),
            top_tags: Vec::new(),
            delta_30d: finite_or_zero(baseline.delta_30d),
            updated: now,
            window_sum: mean * window_weight,
            window_weight,
        };
        record.refresh_top_tags(config.top_tags_limit);
        record
    }

    /// Fades accumulated weight by the time elapsed since the last mutation.
    ///
    /// Returns the applied factor. A replay at the same instant is a no-op.
    pub fn decay(&mut self, now: DateTime<Utc>, config: &EngineConfig) -> f64 {
        let factor = decay_weight(self.updated, now, config.half_life_days);
        self.sum_w *= factor;
        self.window_sum *= factor;
        self.window_weight *= factor;
        self.n_eff = self.sum_w.max(0.0);
        if now > self.updated {
            self.updated = now;
        }
        factor
    }

    /// Folds one 1–5 rating and its tags into the estimate.
    pub fn submit(
        &mut self,
        rating: f64,
        tags: &[String],
        now: DateTime<Utc>,
        config: &EngineConfig,
    ) {
        let factor = self.decay(now, config);

        let rating = clamp_mean(rating);
        let prior_w = self.sum_w.max(0.0);
        let new_sum_w = prior_w + 1.0;
        let raw = clamp_mean((self.mean * prior_w + rating) / new_sum_w.max(EPSILON));
        let shrunk = clamp_mean(bayesian_shrink(raw, new_sum_w, config.prior_mean, config.prior_n));

        let reference = self.window_mean().unwrap_or(self.mean);
        self.mean = shrunk;
        self.sum_w = new_sum_w;
        self.n_eff = new_sum_w;
        self.delta_30d = finite_or_zero(shrunk - reference);
        self.fold_into_window(shrunk, config.window_max_weight);

        for tag in tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            *self.tag_counts.entry(tag.to_string()).or_insert(0) += 1;
        }
        self.refresh_top_tags(config.top_tags_limit);

        debug!(rating, decay = factor, mean = self.mean, n_eff = self.n_eff, "rating applied");
    }

    /// Confirms the existing score: more confidence, same mean.
    pub fn agree(&mut self, now: DateTime<Utc>, config: &EngineConfig) {
        self.decay(now, config);
        if self.sum_w < config.agree_cap {
            self.sum_w = (self.sum_w.max(0.0) + config.agree_increment).min(config.agree_cap);
            self.n_eff = self.sum_w.max(0.0);
        }
        debug!(n_eff = self.n_eff, "agree applied");
    }

    /// Informal positive signal: a small, prior-shrunk upward nudge.
    pub fn feels_safer(&mut self, now: DateTime<Utc>, config: &EngineConfig) {
        self.decay(now, config);
        let observed = self.sum_w.max(0.0) + 1.0;
        let weight = observed / (config.prior_n.max(0.0) + observed).max(EPSILON);
        let nudge = config.feels_safer_step * weight;
        self.mean = clamp_mean(self.mean + nudge);
        self.delta_30d = finite_or_zero(self.delta_30d + config.feels_safer_trend_bump);
        debug!(mean = self.mean, delta_30d = self.delta_30d, "feels safer applied");
    }

    pub fn view(&self, config: &EngineConfig) -> AggregateView {
        let prior_n = config.prior_n.max(0.0);
        let confidence = if self.n_eff + prior_n < EPSILON {
            0.0
        } else {
            self.n_eff / (self.n_eff + prior_n)
        };
        AggregateView {
            mean: self.mean,
            n_eff: self.n_eff,
            delta_30d: self.delta_30d,
            top_tags: self.top_tags.clone(),
            confidence,
        }
    }

    fn window_mean(&self) -> Option<f64> {
        (self.window_weight > EPSILON).then(|| self.window_sum / self.window_weight)
    }

    fn fold_into_window(&mut self, mean: f64, max_weight: f64) {
        self.window_sum += mean;
        self.window_weight += 1.0;
        if self.window_weight > max_weight {
            let scale = max_weight / self.window_weight;
            self.window_sum *= scale;
            self.window_weight = max_weight;
        }
    }

    fn refresh_top_tags(&mut self, limit: usize) {
        let total: u32 = self.tag_counts.values().sum();
        if total == 0 {
            self.top_tags.clear();
            return;
        }
        self.top_tags = self
            .tag_counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(tag, count)| TagShare {
                tag: tag.clone(),
                proportion: f64::from(*count) / f64::from(total),
            })
            .sorted_by(|a, b| {
                b.proportion
                    .total_cmp(&a.proportion)
                    .then_with(|| a.tag.cmp(&b.tag))
            })
            .take(limit)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|tag| tag.to_string()).collect()
    }

    #[test]
    fn first_rating_is_shrunk_towards_prior() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);
        record.submit(5.0, &[], now, &config);
        // (3*5 + 5*1) / 6
        assert!((record.mean - 20.0 / 6.0).abs() < 1e-9);
        assert_eq!(record.n_eff, 1.0);
    }

    #[test]
    fn next_rating_builds_on_the_stored_mean() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);

        record.submit(1.0, &[], now, &config);
        // (3*5 + 1*1) / 6
        assert!((record.mean - 16.0 / 6.0).abs() < 1e-9);

        record.submit(1.0, &[], now, &config);
        // raw = (16/6 * 1 + 1) / 2, then (3*5 + raw*2) / 7
        let raw = (16.0 / 6.0 + 1.0) / 2.0;
        let expected = (15.0 + raw * 2.0) / 7.0;
        assert!((record.mean - expected).abs() < 1e-9);
        assert!((record.mean - 16.0 / 6.0).abs() < 1e-9);
        assert_eq!(record.n_eff, 2.0);
    }

    #[test]
    fn window_weight_is_capped_and_keeps_its_mean() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);
        for _ in 0..150 {
            record.submit(4.0, &[], now, &config);
        }
        assert_eq!(record.window_weight, config.window_max_weight);

        let before = record.window_mean().unwrap();
        record.fold_into_window(before, config.window_max_weight);
        assert_eq!(record.window_weight, config.window_max_weight);
        assert!((record.window_mean().unwrap() - before).abs() < 1e-9);
        assert!(record.window_sum.is_finite());
    }

    #[test]
    fn window_decays_with_the_weight() {
        let config = EngineConfig::default();
        let start = Utc::now();
        let mut record = AggregateRecord::new(start, &config);
        record.submit(2.0, &[], start, &config);
        let (sum, weight) = (record.window_sum, record.window_weight);
        assert_eq!(weight, 1.0);

        record.decay(start + Duration::days(21), &config);
        assert!((record.window_weight - weight / 2.0).abs() < 1e-6);
        assert!((record.window_sum - sum / 2.0).abs() < 1e-6);
        assert!((record.window_mean().unwrap() - sum / weight).abs() < 1e-9);
    }

    #[test]
    fn same_instant_replay_does_not_decay() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);
        record.submit(2.0, &[], now, &config);
        let before = record.sum_w;
        assert_eq!(record.decay(now, &config), 1.0);
        assert_eq!(record.sum_w, before);
    }

    #[test]
    fn weight_halves_after_one_half_life() {
        let config = EngineConfig::default();
        let start = Utc::now();
        let mut record = AggregateRecord::new(start, &config);
        record.submit(4.0, &[], start, &config);
        record.decay(start + Duration::days(21), &config);
        assert!((record.n_eff - 0.5).abs() < 1e-6);
    }

    #[test]
    fn agree_raises_confidence_only() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);
        record.submit(2.0, &[], now, &config);
        let mean = record.mean;
        record.agree(now, &config);
        assert_eq!(record.mean, mean);
        assert!((record.n_eff - 1.3).abs() < 1e-9);
    }

    #[test]
    fn agree_respects_cap() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);
        for _ in 0..500 {
            record.agree(now, &config);
        }
        assert_eq!(record.sum_w, config.agree_cap);
    }

    #[test]
    fn feels_safer_nudges_up_and_trends_up() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);
        record.submit(2.0, &[], now, &config);
        let (mean, delta) = (record.mean, record.delta_30d);
        record.feels_safer(now, &config);
        assert!(record.mean > mean);
        assert!(record.delta_30d > delta);
    }

    #[test]
    fn feels_safer_stays_in_range_at_the_top() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);
        for _ in 0..200 {
            record.submit(5.0, &[], now, &config);
            record.feels_safer(now, &config);
        }
        assert!(record.mean <= 5.0);
    }

    #[test]
    fn top_tags_sorted_by_share() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = AggregateRecord::new(now, &config);
        record.submit(2.0, &tags(&["dogs", "poor_lighting"]), now, &config);
        record.submit(2.0, &tags(&["poor_lighting", "  "]), now, &config);
        record.submit(2.0, &tags(&["poor_lighting", "traffic"]), now, &config);
        let shares: Vec<_> = record.top_tags.iter().map(|share| share.tag.as_str()).collect();
        assert_eq!(shares, vec!["poor_lighting", "dogs", "traffic"]);
        assert!((record.top_tags[0].proportion - 0.6).abs() < 1e-9);
    }

    #[test]
    fn declining_ratings_trend_negative() {
        let config = EngineConfig::default();
        let start = Utc::now();
        let mut record = AggregateRecord::new(start, &config);
        for day in 0..5 {
            record.submit(4.0, &[], start + Duration::days(day), &config);
        }
        record.submit(1.0, &[], start + Duration::days(6), &config);
        assert!(record.delta_30d < 0.0);
    }

    #[test]
    fn baseline_seeding_sanitises_input() {
        let config = EngineConfig::default();
        let baseline = BaselineRecord {
            mean: 11.0,
            n_eff: f64::NAN,
            tags: HashMap::from([("dogs".to_string(), 2)]),
            delta_30d: 0.4,
        };
        let record = AggregateRecord::from_baseline(&baseline, Utc::now(), &config);
        assert_eq!(record.mean, 5.0);
        assert_eq!(record.n_eff, 0.0);
        assert_eq!(record.top_tags.len(), 1);
        assert_eq!(record.delta_30d, 0.4);
    }
}
