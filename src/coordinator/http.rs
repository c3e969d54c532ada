//! HTTP API for the coordinator
//!
//! - `POST /heartbeat`: record a storage node's liveness report
//! - `GET /nodemap`: the published nodemap
//! - `GET /bootstrap`: recorded group bootstrap reports
//! - `GET /health`, `GET /metrics`
//!
//! Every route answers cross-origin requests from any origin.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{ClusterStore, Error, METRICS};
use crate::coordinator::bootstrap::load_reports;
use crate::coordinator::recompute::load_published;
use crate::coordinator::registry::{NodeHeartbeat, NodeRegistry};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct CoordState {
    pub node_id: String,
    pub registry: NodeRegistry,
    pub store: Arc<dyn ClusterStore>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/heartbeat", post(heartbeat))
        .route("/nodemap", get(get_nodemap))
        .route("/bootstrap", get(list_bootstrap))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn(request_tracing_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(err: Error) -> Response {
    (err.to_http_status(), Json(json!({ "error": err.to_string() }))).into_response()
}

async fn heartbeat(State(state): State<CoordState>, body: Bytes) -> Response {
    let heartbeat = match NodeHeartbeat::from_json(&body) {
        Ok(hb) => hb,
        Err(e) => {
            tracing::warn!("Rejected heartbeat: {}", e);
            return error_response(e);
        }
    };

    match state.registry.record_heartbeat(&heartbeat).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Err(e) => {
            tracing::error!("Failed to record heartbeat from {}: {}", heartbeat.node_id, e);
            error_response(e)
        }
    }
}

async fn get_nodemap(State(state): State<CoordState>) -> Response {
    match load_published(state.store.as_ref()).await {
        Ok(nodemap) => (StatusCode::OK, Json(nodemap)).into_response(),
        Err(e) => {
            tracing::error!("Cannot serve nodemap: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn list_bootstrap(State(state): State<CoordState>) -> Response {
    match load_reports(state.store.as_ref()).await {
        Ok(reports) => (StatusCode::OK, Json(reports)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "role": "coordinator",
        "node_id": state.node_id,
        "version": crate::VERSION,
        "nodemap_version": METRICS.nodemap_version.get(),
        "uptime_seconds": METRICS.uptime_seconds(),
    }))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}
