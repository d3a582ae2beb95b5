use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lightweight community nudges that bypass the full rating form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoteKind {
    Agree,
    FeelsSafer,
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteKind::Agree => f.write_str("agree"),
            VoteKind::FeelsSafer => f.write_str("feels-safer"),
        }
    }
}

/// One-shot gate per `(kind, segment)` for the life of a session.
///
/// Without it a single user could inflate `n_eff` by clicking repeatedly.
#[derive(Debug, Clone, Default)]
pub struct SessionThrottle {
    votes: HashMap<(VoteKind, String), DateTime<Utc>>,
}

impl SessionThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_throttled(&self, segment_id: &str, kind: VoteKind) -> bool {
        self.votes.contains_key(&(kind, segment_id.to_string()))
    }

    /// Records a vote. Returns `false` if one was already recorded, in which
    /// case the original timestamp is kept.
    pub fn record_vote(&mut self, segment_id: &str, kind: VoteKind, at: DateTime<Utc>) -> bool {
        match self.votes.entry((kind, segment_id.to_string())) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(at);
                true
            }
        }
    }

    pub fn recorded_at(&self, segment_id: &str, kind: VoteKind) -> Option<DateTime<Utc>> {
        self.votes.get(&(kind, segment_id.to_string())).copied()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn second_vote_is_refused() {
        let mut throttle = SessionThrottle::new();
        let now = Utc::now();
        assert!(!throttle.is_throttled("seg_1", VoteKind::Agree));
        assert!(throttle.record_vote("seg_1", VoteKind::Agree, now));
        assert!(throttle.is_throttled("seg_1", VoteKind::Agree));
        assert!(!throttle.record_vote("seg_1", VoteKind::Agree, now + Duration::minutes(5)));
        assert_eq!(throttle.recorded_at("seg_1", VoteKind::Agree), Some(now));
    }

    #[test]
    fn kinds_and_segments_are_independent() {
        let mut throttle = SessionThrottle::new();
        let now = Utc::now();
        throttle.record_vote("seg_1", VoteKind::Agree, now);
        assert!(!throttle.is_throttled("seg_1", VoteKind::FeelsSafer));
        assert!(!throttle.is_throttled("seg_2", VoteKind::Agree));
    }
}
