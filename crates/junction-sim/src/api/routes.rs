//! Read-only JSON endpoints over the last published snapshot.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use junction_core::graph::Topology;
use junction_core::models::{
    ApproachingTrafficResponse, EdgeTrafficResponse, NodeId, PassageResponse, SimStatus,
};

/// JSON error reply: `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn not_loaded() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "topology not loaded".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Create the API router.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/traffic/:cluster_id", get(edge_traffic))
        .route("/approaching_traffic/:node_id", get(approaching_traffic))
        .route("/passed_through_node_count/:node_id", get(passed_through))
        .route("/status", get(status))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
}

fn loaded(state: &AppState) -> Result<&Arc<Topology>, ApiError> {
    state.topology().ok_or_else(ApiError::not_loaded)
}

/// Ids that do not parse are simply unknown.
fn parse_id(raw: &str, kind: &str) -> Result<u32, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("unknown {} {}", kind, raw)))
}

fn known_node(topology: &Topology, raw: &str) -> Result<NodeId, ApiError> {
    let node = parse_id(raw, "node")?;
    if topology.graph.contains_node(node) {
        Ok(node)
    } else {
        Err(ApiError::not_found(format!("unknown node {}", node)))
    }
}

async fn edge_traffic(
    State(state): State<Arc<AppState>>,
    Path(cluster_id): Path<String>,
) -> Result<Json<EdgeTrafficResponse>, ApiError> {
    let topology = loaded(&state)?;
    let cluster_id = parse_id(&cluster_id, "cluster")?;
    let edge = topology
        .clusters
        .edge_for(cluster_id)
        .ok_or_else(|| ApiError::not_found(format!("cluster {} is not mapped", cluster_id)))?;

    let load = state.snapshot().edge_load(&edge);
    Ok(Json(EdgeTrafficResponse {
        cluster_id,
        edge_u: edge.u(),
        edge_v: edge.v(),
        current_traffic_count: load.traffic,
        priority_detected: load.priority_detected,
    }))
}

async fn approaching_traffic(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<ApproachingTrafficResponse>, ApiError> {
    let topology = loaded(&state)?;
    let node_id = known_node(topology, &node_id)?;
    let traffic_per_approach = state
        .snapshot()
        .approaching(&topology.graph, node_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown node {}", node_id)))?;
    Ok(Json(ApproachingTrafficResponse {
        node_id,
        traffic_per_approach,
    }))
}

async fn passed_through(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<PassageResponse>, ApiError> {
    let topology = loaded(&state)?;
    let node_id = known_node(topology, &node_id)?;
    Ok(Json(PassageResponse {
        node_id,
        cars_passed_through_last_step: state.snapshot().passed_through(node_id),
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<SimStatus> {
    Json(state.status())
}
