use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeoJsonValue};
use serde_json::json;

use crate::graph::{Route, SegmentGraph};
use crate::safety::RatingStore;

/// Renders a route as one LineString feature per segment, annotated with the
/// segment's current aggregate so a map layer can colour it.
///
/// Segments missing from the graph are left out.
pub fn route_to_geojson(
    graph: &SegmentGraph,
    route: &Route,
    ratings: &RatingStore,
) -> FeatureCollection {
    let features = route
        .segment_ids
        .iter()
        .enumerate()
        .filter_map(|(order, segment_id)| {
            let segment = graph.segment(segment_id)?;
            let coordinates: Vec<Vec<f64>> =
                segment.geometry.coords().map(|c| vec![c.x, c.y]).collect();

            let mut properties = JsonObject::new();
            properties.insert("segment_id".to_string(), json!(segment.id));
            properties.insert("order".to_string(), json!(order));
            properties.insert("length_m".to_string(), json!(segment.length_m));
            properties.insert("class".to_string(), json!(segment.class));
            if let Some(view) = ratings.view(segment_id) {
                properties.insert("mean".to_string(), json!(view.mean));
                properties.insert("n_eff".to_string(), json!(view.n_eff));
                properties.insert("delta_30d".to_string(), json!(view.delta_30d));
            }

            Some(Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeoJsonValue::LineString(coordinates))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
