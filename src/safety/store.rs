use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::SegmentScores;
use super::record::{AggregateRecord, AggregateView, BaselineRecord};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::submission::Submission;

/// Owns one [`AggregateRecord`] per segment id.
///
/// Records are created on first use, or up front from a baseline snapshot,
/// and live as long as the store.
#[derive(Debug, Clone)]
pub struct RatingStore {
    records: HashMap<String, AggregateRecord>,
    config: EngineConfig,
}

impl RatingStore {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            records: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Seeds records for segments that have no live state yet.
    ///
    /// Returns how many records were created.
    pub fn seed_baseline(
        &mut self,
        snapshot: &HashMap<String, BaselineRecord>,
        at: DateTime<Utc>,
    ) -> usize {
        let mut seeded = 0;
        for (segment_id, baseline) in snapshot {
            if self.records.contains_key(segment_id) {
                continue;
            }
            self.records.insert(
                segment_id.clone(),
                AggregateRecord::from_baseline(baseline, at, &self.config),
            );
            seeded += 1;
        }
        info!(seeded, "baseline snapshot applied");
        seeded
    }

    pub fn record(&self, segment_id: &str) -> Option<&AggregateRecord> {
        self.records.get(segment_id)
    }

    pub fn view(&self, segment_id: &str) -> Option<AggregateView> {
        self.records.get(segment_id).map(|record| record.view(&self.config))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn submit(
        &mut self,
        segment_id: &str,
        rating: f64,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> &AggregateRecord {
        let config = &self.config;
        let record = self
            .records
            .entry(segment_id.to_string())
            .or_insert_with(|| AggregateRecord::new(now, config));
        record.submit(rating, tags, now, config);
        record
    }

    pub fn agree(&mut self, segment_id: &str, now: DateTime<Utc>) -> &AggregateRecord {
        let config = &self.config;
        let record = self
            .records
            .entry(segment_id.to_string())
            .or_insert_with(|| AggregateRecord::new(now, config));
        record.agree(now, config);
        record
    }

    pub fn feels_safer(&mut self, segment_id: &str, now: DateTime<Utc>) -> &AggregateRecord {
        let config = &self.config;
        let record = self
            .records
            .entry(segment_id.to_string())
            .or_insert_with(|| AggregateRecord::new(now, config));
        record.feels_safer(now, config);
        record
    }

    /// Applies a validated submission to every segment it names.
    ///
    /// Overrides replace the overall rating for their segment. Returns the
    /// touched segment ids in payload order.
    pub fn apply_submission(&mut self, submission: &Submission) -> Vec<String> {
        self.apply_to(submission, &submission.segment_ids)
    }

    pub(crate) fn apply_to(
        &mut self,
        submission: &Submission,
        segment_ids: &[String],
    ) -> Vec<String> {
        for segment_id in segment_ids {
            let rating = f64::from(submission.rating_for(segment_id));
            self.submit(segment_id, rating, &submission.tags, submission.timestamp);
        }
        debug!(
            route_id = %submission.route_id,
            segments = segment_ids.len(),
            "submission applied"
        );
        segment_ids.to_vec()
    }
}

impl SegmentScores for RatingStore {
    fn score(&self, segment_id: &str) -> Option<f64> {
        self.records.get(segment_id).map(|record| record.mean)
    }
}

/// Parses a baseline snapshot: a JSON object keyed by segment id.
pub fn load_baseline(text: &str) -> Result<HashMap<String, BaselineRecord>, Error> {
    Ok(serde_json::from_str(text)?)
}
