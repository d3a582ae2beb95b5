mod api;

use std::sync::Arc;

use anyhow::Context;
use axum::{Router, routing::{get, post}};
use chrono::Utc;
use parking_lot::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use saferoute::safety::load_baseline;
use saferoute::{EngineConfig, RoutingSession, SegmentGraph};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 1. Engine tuning
    let config = match std::env::var("SAFEROUTE_CONFIG") {
        Ok(path) => EngineConfig::load(&path).with_context(|| format!("loading config {path}"))?,
        Err(_) => EngineConfig::default(),
    };

    // 2. Segment network (GeoJSON FeatureCollection)
    let segments_path = std::env::var("SAFEROUTE_SEGMENTS")
        .unwrap_or_else(|_| "assets/segments.geojson".to_string());
    let text = std::fs::read_to_string(&segments_path)
        .with_context(|| format!("reading segment network {segments_path}"))?;
    let graph = SegmentGraph::from_geojson(&text, config.coordinate_precision)
        .with_context(|| format!("parsing segment network {segments_path}"))?;

    // 3. Optional historical ratings
    let mut session = RoutingSession::new(graph, config);
    if let Ok(baseline_path) = std::env::var("SAFEROUTE_BASELINE") {
        let text = std::fs::read_to_string(&baseline_path)
            .with_context(|| format!("reading baseline {baseline_path}"))?;
        let snapshot = load_baseline(&text)
            .with_context(|| format!("parsing baseline {baseline_path}"))?;
        session = session.with_baseline(&snapshot, Utc::now());
    }

    let shared_state = Arc::new(AppState {
        session: Mutex::new(session),
    });

    // 4. Setup CORS (Allows a local map page to talk to this API)
    let cors = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_origin(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    // 5. Setup Router
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/route", post(api::calculate_route))
        .route("/ratings", post(api::submit_rating))
        .route("/segments/:id", get(api::get_segment))
        .route("/segments/:id/agree", post(api::agree))
        .route("/segments/:id/feels-safer", post(api::feels_safer))
        .layer(cors)
        .with_state(shared_state);

    let addr = std::env::var("SAFEROUTE_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!(%addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
