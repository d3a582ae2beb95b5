use std::collections::HashMap;

use chrono::{DateTime, Utc};
use geo::Coord;
use geojson::FeatureCollection;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::compare::{RouteComparison, summarize};
use crate::config::EngineConfig;
use crate::export::route_to_geojson;
use crate::graph::{Route, SegmentGraph};
use crate::routing::{CostKind, ShortestPath, shortest_path};
use crate::safety::{AggregateView, BaselineRecord, RatingStore};
use crate::submission::{Submission, TravelMode, ValidationErrors};
use crate::throttle::{SessionThrottle, VoteKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathQuery {
    pub start: Coord<f64>,
    pub end: Coord<f64>,
    pub penalty_factor: Option<f64>,
    pub mode: TravelMode,
}

/// Base and safety-weighted routes for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePlan {
    pub base: Route,
    pub alt: Route,
    pub comparison: RouteComparison,
    pub penalty_factor_used: f64,
    pub escalations: u32,
    /// The alternative could not improve on the base route, even after
    /// escalating the penalty.
    pub alt_equals_base: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VoteOutcome {
    Recorded { aggregate: AggregateView },
    /// This session already voted; the host should say so rather than
    /// silently ignore the click.
    AlreadyRecorded,
    UnknownSegment,
}

/// Graph, rating store and nudge throttle for one user-facing session.
///
/// All operations are synchronous; a host sharing a session between requests
/// must serialize access to it.
pub struct RoutingSession {
    graph: SegmentGraph,
    ratings: RatingStore,
    throttle: SessionThrottle,
    config: EngineConfig,
}

impl RoutingSession {
    pub fn new(graph: SegmentGraph, config: EngineConfig) -> Self {
        Self {
            graph,
            ratings: RatingStore::new(config.clone()),
            throttle: SessionThrottle::new(),
            config,
        }
    }

    pub fn with_baseline(
        mut self,
        snapshot: &HashMap<String, BaselineRecord>,
        at: DateTime<Utc>,
    ) -> Self {
        self.ratings.seed_baseline(snapshot, at);
        self
    }

    pub fn graph(&self) -> &SegmentGraph {
        &self.graph
    }

    pub fn ratings(&self) -> &RatingStore {
        &self.ratings
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shortest_path(
        &self,
        start: NodeIndex,
        end: NodeIndex,
        cost: CostKind,
    ) -> Option<ShortestPath> {
        shortest_path(&self.graph, start, end, cost, &self.ratings)
    }

    /// Snaps both ends of the query to the network and searches the base and
    /// the safety-weighted route.
    ///
    /// When the alternative comes back identical to the base route the penalty
    /// factor is escalated and the search retried, up to `max_escalations`
    /// times. `None` means no route joins the two points.
    pub fn plan(&self, query: &PathQuery) -> Option<RoutePlan> {
        let start = self.graph.find_nearest_node(query.start.y, query.start.x)?;
        let end = self.graph.find_nearest_node(query.end.y, query.end.x)?;

        let base = self.shortest_path(start, end, CostKind::Base)?;

        let mut penalty_factor = query.penalty_factor.unwrap_or(self.config.default_penalty_factor);
        let mut escalations = 0;
        let mut alt = self.shortest_path(start, end, CostKind::Alt { penalty_factor })?;
        while alt.segment_path == base.segment_path
            && penalty_factor > 0.0
            && escalations < self.config.max_escalations
        {
            penalty_factor *= self.config.penalty_escalation;
            escalations += 1;
            debug!(penalty_factor, escalations, "alternative equals base, escalating penalty");
            alt = self.shortest_path(start, end, CostKind::Alt { penalty_factor })?;
        }

        let alt_equals_base = alt.segment_path == base.segment_path;
        let base = Route {
            segment_ids: base.segment_path,
            total_length_m: base.total_length_m,
        };
        let alt = Route {
            segment_ids: alt.segment_path,
            total_length_m: alt.total_length_m,
        };
        let comparison = summarize(&base, &alt, &self.ratings, query.mode, &self.config);

        Some(RoutePlan {
            base,
            alt,
            comparison,
            penalty_factor_used: penalty_factor,
            escalations,
            alt_equals_base,
        })
    }

    pub fn compare(&self, base: &Route, alt: &Route, mode: TravelMode) -> RouteComparison {
        summarize(base, alt, &self.ratings, mode, &self.config)
    }

    /// Applies a validated submission to the segments this network knows.
    pub fn submit(&mut self, submission: &Submission) -> SubmissionReceipt {
        let (known, skipped): (Vec<String>, Vec<String>) = submission
            .segment_ids
            .iter()
            .cloned()
            .partition(|segment_id| self.graph.segment(segment_id).is_some());
        for segment_id in &skipped {
            warn!(
                segment_id = %segment_id,
                route_id = %submission.route_id,
                "rating for unknown segment skipped"
            );
        }
        let applied = self.ratings.apply_to(submission, &known);
        SubmissionReceipt { applied, skipped }
    }

    /// Validates a raw JSON submission and applies it. Nothing is applied
    /// unless the whole payload is valid.
    pub fn submit_json(&mut self, text: &str) -> Result<SubmissionReceipt, ValidationErrors> {
        let submission = Submission::from_json(text)?;
        Ok(self.submit(&submission))
    }

    pub fn vote(&mut self, segment_id: &str, kind: VoteKind, now: DateTime<Utc>) -> VoteOutcome {
        if self.graph.segment(segment_id).is_none() {
            warn!(segment_id, %kind, "vote for unknown segment");
            return VoteOutcome::UnknownSegment;
        }
        if !self.throttle.record_vote(segment_id, kind, now) {
            debug!(segment_id, %kind, "vote already recorded this session");
            return VoteOutcome::AlreadyRecorded;
        }
        let record = match kind {
            VoteKind::Agree => self.ratings.agree(segment_id, now),
            VoteKind::FeelsSafer => self.ratings.feels_safer(segment_id, now),
        };
        VoteOutcome::Recorded {
            aggregate: record.view(&self.config),
        }
    }

    pub fn agree(&mut self, segment_id: &str, now: DateTime<Utc>) -> VoteOutcome {
        self.vote(segment_id, VoteKind::Agree, now)
    }

    pub fn feels_safer(&mut self, segment_id: &str, now: DateTime<Utc>) -> VoteOutcome {
        self.vote(segment_id, VoteKind::FeelsSafer, now)
    }

    pub fn is_throttled(&self, segment_id: &str, kind: VoteKind) -> bool {
        self.throttle.is_throttled(segment_id, kind)
    }

    pub fn aggregate(&self, segment_id: &str) -> Option<AggregateView> {
        self.ratings.view(segment_id)
    }

    pub fn route_geojson(&self, route: &Route) -> FeatureCollection {
        route_to_geojson(&self.graph, route, &self.ratings)
    }
}
