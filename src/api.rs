use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use geo::Coord;
use geojson::FeatureCollection;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use saferoute::{
    AggregateView, PathQuery, RouteComparison, RoutingSession, TravelMode, ValidationErrors,
    VoteKind, VoteOutcome,
};

pub struct AppState {
    pub session: Mutex<RoutingSession>,
}

pub enum ApiError {
    NotFound(String),
    Rejected(ValidationErrors),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            ApiError::Rejected(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(errors)).into_response()
            }
        }
    }
}

// --- API DTOs ---

#[derive(Deserialize)]
pub struct RouteRequest {
    origin: [f64; 2],      // [lat, lon]
    destination: [f64; 2], // [lat, lon]
    penalty_factor: Option<f64>,
    #[serde(default = "default_mode")]
    mode: TravelMode,
}

fn default_mode() -> TravelMode {
    TravelMode::Walk
}

#[derive(Serialize)]
pub struct RouteBody {
    segment_ids: Vec<String>,
    total_length_m: f64,
    geometry: FeatureCollection,
}

#[derive(Serialize)]
pub struct RouteResponse {
    base: RouteBody,
    alt: RouteBody,
    comparison: RouteComparison,
    penalty_factor_used: f64,
    alt_equals_base: bool,
}

// --- Handlers ---

pub async fn calculate_route(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RouteRequest>,
) -> Result<Json<RouteResponse>, ApiError> {
    let session = state.session.lock();
    let query = PathQuery {
        start: Coord { x: payload.origin[1], y: payload.origin[0] },
        end: Coord { x: payload.destination[1], y: payload.destination[0] },
        penalty_factor: payload.penalty_factor,
        mode: payload.mode,
    };

    let plan = session
        .plan(&query)
        .ok_or_else(|| ApiError::NotFound("no route found".to_string()))?;

    let base_geometry = session.route_geojson(&plan.base);
    let alt_geometry = session.route_geojson(&plan.alt);
    Ok(Json(RouteResponse {
        base: RouteBody {
            segment_ids: plan.base.segment_ids,
            total_length_m: plan.base.total_length_m,
            geometry: base_geometry,
        },
        alt: RouteBody {
            segment_ids: plan.alt.segment_ids,
            total_length_m: plan.alt.total_length_m,
            geometry: alt_geometry,
        },
        comparison: plan.comparison,
        penalty_factor_used: plan.penalty_factor_used,
        alt_equals_base: plan.alt_equals_base,
    }))
}

/// Takes the body as text so schema problems come back as a field list
/// instead of an extractor rejection.
pub async fn submit_rating(State(state): State<Arc<AppState>>, body: String) -> Response {
    let mut session = state.session.lock();
    match session.submit_json(&body) {
        Ok(receipt) => {
            info!(
                applied = receipt.applied.len(),
                skipped = receipt.skipped.len(),
                "rating accepted"
            );
            (StatusCode::ACCEPTED, Json(receipt)).into_response()
        }
        Err(errors) => ApiError::Rejected(errors).into_response(),
    }
}

pub async fn get_segment(
    State(state): State<Arc<AppState>>,
    Path(segment_id): Path<String>,
) -> Result<Json<AggregateView>, ApiError> {
    let session = state.session.lock();
    session
        .aggregate(&segment_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no ratings for segment {segment_id}")))
}

pub async fn agree(
    State(state): State<Arc<AppState>>,
    Path(segment_id): Path<String>,
) -> Result<Json<VoteOutcome>, ApiError> {
    vote(&state, &segment_id, VoteKind::Agree)
}

pub async fn feels_safer(
    State(state): State<Arc<AppState>>,
    Path(segment_id): Path<String>,
) -> Result<Json<VoteOutcome>, ApiError> {
    vote(&state, &segment_id, VoteKind::FeelsSafer)
}

fn vote(state: &AppState, segment_id: &str, kind: VoteKind) -> Result<Json<VoteOutcome>, ApiError> {
    let mut session = state.session.lock();
    match session.vote(segment_id, kind, Utc::now()) {
        VoteOutcome::UnknownSegment => {
            Err(ApiError::NotFound(format!("unknown segment {segment_id}")))
        }
        outcome => Ok(Json(outcome)),
    }
}
