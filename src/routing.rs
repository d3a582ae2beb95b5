use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use tracing::warn;

use crate::config::DEFAULT_PRIOR_MEAN;
use crate::graph::{SegmentEdge, SegmentGraph};
use crate::safety::SegmentScores;

/// Which cost a path search minimizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostKind {
    /// Plain length in meters.
    Base,
    /// Length inflated by how poorly the segment is rated.
    Alt { penalty_factor: f64 },
}

pub trait EdgeWeighting {
    fn edge_cost(&self, edge: &SegmentEdge) -> f64;
}

pub struct DistanceWeighting;

impl EdgeWeighting for DistanceWeighting {
    fn edge_cost(&self, edge: &SegmentEdge) -> f64 {
        edge.length_m
    }
}

/// `length * (1 + penalty_factor * (6 - score) / 5)`, unrated segments score 3.
pub struct SafetyWeighting<'a, S: ?Sized> {
    scores: &'a S,
    penalty_factor: f64,
}

impl<'a, S: SegmentScores + ?Sized> SafetyWeighting<'a, S> {
    pub fn new(scores: &'a S, penalty_factor: f64) -> Self {
        let penalty_factor = if penalty_factor.is_finite() && penalty_factor >= 0.0 {
            penalty_factor
        } else {
            warn!(penalty_factor, "invalid penalty factor, falling back to distance cost");
            0.0
        };
        Self {
            scores,
            penalty_factor,
        }
    }
}

impl<S: SegmentScores + ?Sized> EdgeWeighting for SafetyWeighting<'_, S> {
    fn edge_cost(&self, edge: &SegmentEdge) -> f64 {
        let score = self.scores.score_or(&edge.segment_id, DEFAULT_PRIOR_MEAN);
        edge.length_m * (1.0 + self.penalty_factor * (6.0 - score) / 5.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortestPath {
    #[serde(skip)]
    pub node_path: Vec<NodeIndex>,
    pub segment_path: Vec<String>,
    pub total_length_m: f64,
    pub total_cost: f64,
}

#[derive(Copy, Clone, PartialEq)]
struct State {
    cost: f64,
    seq: u64,
    node: NodeIndex,
}

impl Eq for State {}

// Min-heap by cost, earlier pushes win ties.
impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra between two nodes of the segment graph.
///
/// Returns `None` when either node is not in the graph or no path joins them.
/// For a fixed graph and score snapshot the result is reproducible: equal-cost
/// candidates are settled in push order and only strict improvements relax.
pub fn shortest_path<S: SegmentScores + ?Sized>(
    graph: &SegmentGraph,
    start: NodeIndex,
    end: NodeIndex,
    cost: CostKind,
    scores: &S,
) -> Option<ShortestPath> {
    match cost {
        CostKind::Base => shortest_path_with(graph, start, end, &DistanceWeighting),
        CostKind::Alt { penalty_factor } => {
            shortest_path_with(graph, start, end, &SafetyWeighting::new(scores, penalty_factor))
        }
    }
}

pub fn shortest_path_with<W: EdgeWeighting + ?Sized>(
    graph: &SegmentGraph,
    start: NodeIndex,
    end: NodeIndex,
    weighting: &W,
) -> Option<ShortestPath> {
    let g = &graph.graph;
    if g.node_weight(start).is_none() || g.node_weight(end).is_none() {
        return None;
    }

    let mut distances: HashMap<NodeIndex, f64> = HashMap::new();
    let mut previous: HashMap<NodeIndex, EdgeIndex> = HashMap::new();
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;

    distances.insert(start, 0.0);
    heap.push(State {
        cost: 0.0,
        seq,
        node: start,
    });

    while let Some(State { cost, node, .. }) = heap.pop() {
        if node == end {
            break;
        }

        // Stale entry, a cheaper path was already settled
        if distances.get(&node).is_some_and(|&best| cost > best) {
            continue;
        }

        for edge in g.edges(node) {
            let step = weighting.edge_cost(edge.weight());
            if !step.is_finite() || step < 0.0 {
                continue;
            }
            let next = edge.target();
            let next_cost = cost + step;

            let improves = distances.get(&next).is_none_or(|&best| next_cost < best);
            if improves {
                distances.insert(next, next_cost);
                previous.insert(next, edge.id());
                seq += 1;
                heap.push(State {
                    cost: next_cost,
                    seq,
                    node: next,
                });
            }
        }
    }

    let total_cost = *distances.get(&end)?;

    let mut node_path = vec![end];
    let mut edges = Vec::new();
    let mut current = end;
    while current != start {
        let edge_id = *previous.get(&current)?;
        let (source, _) = g.edge_endpoints(edge_id)?;
        edges.push(edge_id);
        node_path.push(source);
        current = source;
    }
    node_path.reverse();
    edges.reverse();

    let segment_path = edges.iter().map(|&id| g[id].segment_id.clone()).collect();
    let total_length_m = edges.iter().map(|&id| g[id].length_m).sum();

    Some(ShortestPath {
        node_path,
        segment_path,
        total_length_m,
        total_cost,
    })
}

#[cfg(test)]
mod tests {
    use geo::Coord;

    use super::*;
    use crate::graph::Segment;

    fn segment(id: &str, from: (f64, f64), to: (f64, f64), length_m: f64) -> Segment {
        Segment {
            id: id.to_string(),
            geometry: vec![Coord { x: from.0, y: from.1 }, Coord { x: to.0, y: to.1 }].into(),
            length_m,
            class: 3,
        }
    }

    fn node(graph: &SegmentGraph, x: f64, y: f64) -> NodeIndex {
        graph.node_at(Coord { x, y }).unwrap()
    }

    #[test]
    fn base_cost_matches_plain_distances() {
        let graph = SegmentGraph::build(
            vec![
                segment("ab", (0.0, 0.0), (1.0, 0.0), 5.0),
                segment("bc", (1.0, 0.0), (2.0, 0.0), 5.0),
                segment("ac", (0.0, 0.0), (2.0, 0.0), 12.0),
                segment("cd", (2.0, 0.0), (3.0, 0.0), 1.0),
            ],
            6,
        );
        let scores: HashMap<String, f64> = HashMap::new();
        let start = node(&graph, 0.0, 0.0);
        let end = node(&graph, 3.0, 0.0);
        let path = shortest_path(&graph, start, end, CostKind::Base, &scores).unwrap();
        assert_eq!(path.segment_path, vec!["ab", "bc", "cd"]);
        assert_eq!(path.total_length_m, 11.0);
        assert_eq!(path.total_cost, 11.0);
        assert_eq!(path.node_path.len(), 4);
    }

    #[test]
    fn same_node_is_an_empty_path() {
        let graph = SegmentGraph::build(vec![segment("ab", (0.0, 0.0), (1.0, 0.0), 5.0)], 6);
        let start = node(&graph, 0.0, 0.0);
        let scores: HashMap<String, f64> = HashMap::new();
        let path = shortest_path(&graph, start, start, CostKind::Base, &scores).unwrap();
        assert!(path.segment_path.is_empty());
        assert_eq!(path.total_length_m, 0.0);
    }

    #[test]
    fn disconnected_or_absent_nodes_have_no_path() {
        let graph = SegmentGraph::build(
            vec![
                segment("ab", (0.0, 0.0), (1.0, 0.0), 5.0),
                segment("cd", (5.0, 5.0), (6.0, 5.0), 5.0),
            ],
            6,
        );
        let scores: HashMap<String, f64> = HashMap::new();
        let a = node(&graph, 0.0, 0.0);
        let d = node(&graph, 6.0, 5.0);
        assert!(shortest_path(&graph, a, d, CostKind::Base, &scores).is_none());
        assert!(shortest_path(&graph, a, NodeIndex::new(99), CostKind::Base, &scores).is_none());
    }

    #[test]
    fn zero_penalty_reduces_to_base() {
        let graph = SegmentGraph::build(vec![segment("ab", (0.0, 0.0), (1.0, 0.0), 5.0)], 6);
        let scores = HashMap::from([("ab".to_string(), 1.0)]);
        let (a, b) = (node(&graph, 0.0, 0.0), node(&graph, 1.0, 0.0));
        let alt =
            shortest_path(&graph, a, b, CostKind::Alt { penalty_factor: 0.0 }, &scores).unwrap();
        assert_eq!(alt.total_cost, 5.0);
    }

    #[test]
    fn safety_weighting_penalises_low_scores() {
        let scores = HashMap::from([("low".to_string(), 1.0), ("high".to_string(), 5.0)]);
        let weighting = SafetyWeighting::new(&scores, 1.0);
        let edge = |id: &str| SegmentEdge {
            segment_id: id.to_string(),
            length_m: 100.0,
            class: 3,
        };
        assert!((weighting.edge_cost(&edge("low")) - 200.0).abs() < 1e-9);
        assert!((weighting.edge_cost(&edge("high")) - 120.0).abs() < 1e-9);
        assert!((weighting.edge_cost(&edge("unrated")) - 160.0).abs() < 1e-9);
    }

    #[test]
    fn negative_penalty_is_ignored() {
        let scores = HashMap::from([("low".to_string(), 1.0)]);
        let weighting = SafetyWeighting::new(&scores, -3.0);
        let edge = SegmentEdge {
            segment_id: "low".to_string(),
            length_m: 10.0,
            class: 1,
        };
        assert_eq!(weighting.edge_cost(&edge), 10.0);
    }
}
