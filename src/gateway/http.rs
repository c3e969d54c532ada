//! HTTP API for the gateway
//!
//! - `GET /id/:id`: object bytes from the first healthy replica; 404 when
//!   no replica has it or no shard owns the key
//! - `PUT /id/:id`: store the request body on the first accepting replica
//! - `GET /health`, `GET /metrics`
//!
//! Error bodies never carry replica addresses or store details.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, METRICS};
use crate::gateway::router::GatewayRouter;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Clone)]
pub struct GatewayState {
    pub router: Arc<GatewayRouter>,
    pub max_body_bytes: usize,
}

pub fn create_router(state: GatewayState) -> Router {
    let body_limit = RequestBodyLimitLayer::new(state.max_body_bytes);
    Router::new()
        .route("/id/:id", get(get_object).put(put_object))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn(request_tracing_middleware))
        .layer(body_limit)
        .with_state(state)
}

fn error_response(err: &Error) -> Response {
    match err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Error::InvalidPayload(msg) => (StatusCode::BAD_REQUEST, msg.clone()).into_response(),
        _ => (StatusCode::BAD_GATEWAY, "Bad gateway").into_response(),
    }
}

async fn get_object(State(state): State<GatewayState>, Path(id): Path<String>) -> Response {
    tracing::debug!("get: id={} digest={}", id, crate::common::digest_hex(&id));

    match state.router.get(&id).await {
        Ok(data) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        Err(Error::NoShardForKey(digest)) => {
            tracing::warn!("GET {}: no shard owns {}", id, digest);
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(e) => {
            tracing::warn!("GET {} failed: {}", id, e);
            error_response(&e)
        }
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

async fn put_object(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let declared = match content_length(&headers) {
        Some(n) if n > 0 => n,
        _ => {
            tracing::warn!("PUT {} rejected: missing or zero Content-Length", id);
            return (StatusCode::BAD_GATEWAY, "Content-Length required").into_response();
        }
    };
    if declared > state.max_body_bytes as u64 {
        return (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large").into_response();
    }

    let data = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("PUT {} body read failed: {}", id, e);
            return (StatusCode::BAD_REQUEST, "Unreadable body").into_response();
        }
    };

    match state.router.put(&id, data).await {
        Ok(()) => (StatusCode::OK, "Upload finished.").into_response(),
        Err(e) => {
            tracing::warn!("PUT {} failed: {}", id, e);
            error_response(&e)
        }
    }
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let nodemap = state.router.cache().get();
    Json(json!({
        "status": "healthy",
        "role": "gateway",
        "version": crate::VERSION,
        "nodemap_version": nodemap.version,
        "shards": nodemap.shards.len(),
        "uptime_seconds": METRICS.uptime_seconds(),
    }))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}
