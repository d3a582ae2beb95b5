use std::collections::HashMap;
use std::fmt;

use geo::prelude::*;
use geo::{Coord, LineString};
use geojson::{FeatureCollection, GeoJson};
use petgraph::graph::{Graph, NodeIndex};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::error::Error;

/// Lowest-priority functional class, used when a feature omits `class`.
pub const DEFAULT_CLASS: u8 = 4;

/// Node identity: longitude/latitude scaled by `10^precision` and rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub lon: i64,
    pub lat: i64,
    precision: u32,
}

impl NodeKey {
    /// Returns `None` for non-finite coordinates.
    pub fn from_coord(coord: Coord<f64>, precision: u32) -> Option<Self> {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return None;
        }
        let scale = 10f64.powi(precision as i32);
        Some(Self {
            lon: (coord.x * scale).round() as i64,
            lat: (coord.y * scale).round() as i64,
            precision,
        })
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = 10f64.powi(self.precision as i32);
        let digits = self.precision as usize;
        write!(
            f,
            "{:.*},{:.*}",
            digits,
            self.lon as f64 / scale,
            digits,
            self.lat as f64 / scale
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeoNode {
    pub key: NodeKey,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone)]
pub struct SegmentEdge {
    pub segment_id: String,
    pub length_m: f64,
    pub class: u8,
}

/// Atomic ratable unit of street.
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: String,
    pub geometry: LineString<f64>,
    pub length_m: f64,
    pub class: u8,
}

/// Ordered segment ids from origin to destination.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Route {
    pub segment_ids: Vec<String>,
    pub total_length_m: f64,
}

type NodeIndexObject = GeomWithData<[f64; 2], NodeIndex>;

pub struct SegmentGraph {
    pub graph: Graph<GeoNode, SegmentEdge>,
    segments: HashMap<String, Segment>,
    nodes: HashMap<NodeKey, NodeIndex>,
    locations: RTree<NodeIndexObject>,
    precision: u32,
}

impl SegmentGraph {
    /// Materializes topology from segment records.
    ///
    /// Endpoints are rounded to `precision` decimals so that segments sharing
    /// an intersection share a node. Unusable segments are logged and skipped.
    pub fn build(segments: Vec<Segment>, precision: u32) -> Self {
        let mut graph = Graph::new();
        let mut nodes: HashMap<NodeKey, NodeIndex> = HashMap::new();
        let mut by_id: HashMap<String, Segment> = HashMap::new();
        let mut skipped = 0usize;

        for segment in segments {
            let (Some(first), Some(last)) = (segment.geometry.0.first(), segment.geometry.0.last())
            else {
                warn!(segment_id = %segment.id, "skipping segment without coordinates");
                skipped += 1;
                continue;
            };
            if segment.geometry.0.len() < 2 {
                warn!(segment_id = %segment.id, "skipping segment with a single coordinate");
                skipped += 1;
                continue;
            }
            if !segment.length_m.is_finite() || segment.length_m < 0.0 {
                warn!(
                    segment_id = %segment.id,
                    length_m = segment.length_m,
                    "skipping segment with invalid length"
                );
                skipped += 1;
                continue;
            }
            if by_id.contains_key(&segment.id) {
                warn!(segment_id = %segment.id, "skipping duplicate segment id");
                skipped += 1;
                continue;
            }
            let (Some(key_a), Some(key_b)) = (
                NodeKey::from_coord(*first, precision),
                NodeKey::from_coord(*last, precision),
            ) else {
                warn!(segment_id = %segment.id, "skipping segment with non-finite coordinates");
                skipped += 1;
                continue;
            };

            let (first, last) = (*first, *last);
            let idx_a = *nodes.entry(key_a).or_insert_with(|| {
                graph.add_node(GeoNode { key: key_a, lat: first.y, lon: first.x })
            });
            let idx_b = *nodes.entry(key_b).or_insert_with(|| {
                graph.add_node(GeoNode { key: key_b, lat: last.y, lon: last.x })
            });

            let edge_data = SegmentEdge {
                segment_id: segment.id.clone(),
                length_m: segment.length_m,
                class: segment.class,
            };
            graph.add_edge(idx_a, idx_b, edge_data.clone());
            graph.add_edge(idx_b, idx_a, edge_data);
            by_id.insert(segment.id.clone(), segment);
        }

        let locations = RTree::bulk_load(
            graph
                .node_indices()
                .map(|idx| {
                    let node = graph[idx];
                    NodeIndexObject::new([node.lon, node.lat], idx)
                })
                .collect(),
        );

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            skipped,
            "segment graph built"
        );

        Self {
            graph,
            segments: by_id,
            nodes,
            locations,
            precision,
        }
    }

    /// Parses a GeoJSON FeatureCollection and builds the graph from it.
    pub fn from_geojson(text: &str, precision: u32) -> Result<Self, Error> {
        Ok(Self::build(segments_from_geojson(text)?, precision))
    }

    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Exact lookup of the node a coordinate rounds onto.
    pub fn node_at(&self, coord: Coord<f64>) -> Option<NodeIndex> {
        NodeKey::from_coord(coord, self.precision).and_then(|key| self.nodes.get(&key).copied())
    }

    pub fn find_nearest_node(&self, lat: f64, lon: f64) -> Option<NodeIndex> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        self.locations.nearest_neighbor(&[lon, lat]).map(|object| object.data)
    }

    /// Builds a route from segment ids, skipping ids the graph does not know.
    pub fn route_from_segments<I, S>(&self, ids: I) -> Route
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segment_ids = Vec::new();
        let mut total_length_m = 0.0;
        for id in ids {
            let id = id.into();
            match self.segments.get(&id) {
                Some(segment) => {
                    total_length_m += segment.length_m;
                    segment_ids.push(id);
                }
                None => warn!(segment_id = %id, "route references unknown segment, skipping"),
            }
        }
        Route {
            segment_ids,
            total_length_m,
        }
    }
}

/// Reads segment records out of a GeoJSON FeatureCollection.
///
/// Features carry `segment_id`, `length_m` and `class` properties and a
/// LineString geometry. A missing `length_m` is replaced by the haversine
/// length of the geometry; a missing `class` defaults to [`DEFAULT_CLASS`].
///
/// # Errors
///
/// Returns an error if the text is not GeoJSON or not a FeatureCollection.
/// Individual malformed features are skipped with a warning.
pub fn segments_from_geojson(text: &str) -> Result<Vec<Segment>, Error> {
    let geojson: GeoJson = text.parse()?;
    let collection = FeatureCollection::try_from(geojson)?;

    let mut segments = Vec::with_capacity(collection.features.len());
    for (position, feature) in collection.features.into_iter().enumerate() {
        let Some(id) = feature.property("segment_id").and_then(property_as_id) else {
            warn!(feature = position, "skipping feature without segment_id");
            continue;
        };

        let coords = match feature.geometry.as_ref().map(|geometry| &geometry.value) {
            Some(geojson::Value::LineString(positions)) => positions
                .iter()
                .filter(|position| position.len() >= 2)
                .map(|position| Coord { x: position[0], y: position[1] })
                .collect::<Vec<_>>(),
            _ => {
                warn!(segment_id = %id, "skipping feature without LineString geometry");
                continue;
            }
        };
        let geometry = LineString::new(coords);

        let length_m = match feature.property("length_m").and_then(JsonValue::as_f64) {
            Some(length) => length,
            None => geometry.haversine_length(),
        };

        let class = match feature.property("class").and_then(JsonValue::as_u64) {
            Some(class @ 1..=4) => class as u8,
            Some(other) => {
                warn!(segment_id = %id, class = other, "class out of range, using lowest priority");
                DEFAULT_CLASS
            }
            None => DEFAULT_CLASS,
        };

        segments.push(Segment {
            id,
            geometry,
            length_m,
            class,
        });
    }

    Ok(segments)
}

fn property_as_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(id) if !id.is_empty() => Some(id.clone()),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: &str, coords: &[(f64, f64)], length_m: f64) -> Segment {
        Segment {
            id: id.to_string(),
            geometry: coords.iter().map(|&(x, y)| Coord { x, y }).collect(),
            length_m,
            class: 3,
        }
    }

    #[test]
    fn shared_endpoints_become_one_node() {
        let graph = SegmentGraph::build(
            vec![
                segment("a", &[(0.0, 0.0), (0.001, 0.0)], 111.0),
                segment("b", &[(0.0010000004, 0.0), (0.002, 0.0)], 111.0),
            ],
            6,
        );
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.graph.edge_count(), 4);
    }

    #[test]
    fn skips_degenerate_and_duplicate_segments() {
        let graph = SegmentGraph::build(
            vec![
                segment("a", &[(0.0, 0.0)], 10.0),
                segment("b", &[(0.0, 0.0), (1.0, 1.0)], f64::NAN),
                segment("c", &[(0.0, 0.0), (1.0, 1.0)], 10.0),
                segment("c", &[(2.0, 2.0), (3.0, 3.0)], 10.0),
            ],
            6,
        );
        assert_eq!(graph.segment_count(), 1);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn route_skips_unknown_segments() {
        let graph = SegmentGraph::build(vec![segment("a", &[(0.0, 0.0), (1.0, 0.0)], 40.0)], 6);
        let route = graph.route_from_segments(["a", "missing"]);
        assert_eq!(route.segment_ids, vec!["a".to_string()]);
        assert_eq!(route.total_length_m, 40.0);
    }

    #[test]
    fn nearest_node_snaps_to_closest_endpoint() {
        let graph = SegmentGraph::build(vec![segment("a", &[(0.0, 0.0), (1.0, 0.0)], 40.0)], 6);
        let idx = graph.find_nearest_node(0.1, 0.9).unwrap();
        assert_eq!(graph.graph[idx].lon, 1.0);
    }

    #[test]
    fn node_key_display_uses_precision() {
        let key = NodeKey::from_coord(Coord { x: 13.4, y: 52.52 }, 3).unwrap();
        assert_eq!(key.to_string(), "13.400,52.520");
    }

    #[test]
    fn parses_feature_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature",
                 "properties": {"segment_id": "seg_001", "length_m": 120.5, "class": 2},
                 "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [0.001, 0.0]]}},
                {"type": "Feature",
                 "properties": {"segment_id": 7},
                 "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [0.0, 0.001]]}},
                {"type": "Feature",
                 "properties": {"length_m": 5.0},
                 "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [0.0, 0.001]]}},
                {"type": "Feature",
                 "properties": {"segment_id": "pt"},
                 "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}}
            ]
        }"#;
        let segments = segments_from_geojson(text).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].class, 2);
        assert_eq!(segments[1].id, "7");
        assert_eq!(segments[1].class, DEFAULT_CLASS);
        assert!((segments[1].length_m - 111.2).abs() < 1.0);
    }

    #[test]
    fn rejects_non_collection_documents() {
        let text = r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#;
        assert!(segments_from_geojson(text).is_err());
    }
}
