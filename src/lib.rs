//! Safety-aware street routing.
//!
//! Builds a segment graph from a street network, finds the shortest route and
//! a safety-weighted alternative, and aggregates community ratings into
//! time-decayed per-segment scores that feed back into routing.

pub mod compare;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod routing;
pub mod safety;
pub mod session;
pub mod submission;
pub mod throttle;

pub use compare::{RouteComparison, summarize};
pub use config::EngineConfig;
pub use error::Error;
pub use graph::{Route, Segment, SegmentGraph};
pub use routing::{CostKind, ShortestPath, shortest_path};
pub use safety::{AggregateRecord, AggregateView, RatingStore, SegmentScores};
pub use session::{PathQuery, RoutePlan, RoutingSession, VoteOutcome};
pub use submission::{Submission, TravelMode, ValidationErrors};
pub use throttle::{SessionThrottle, VoteKind};
