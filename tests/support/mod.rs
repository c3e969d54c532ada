//! In-process fake storage nodes and server helpers

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Default)]
pub struct FakeNodeState {
    pub slices: Mutex<HashMap<String, Vec<u8>>>,
    /// `(path, json body)` of every management call, in arrival order
    pub management_calls: Mutex<Vec<(String, serde_json::Value)>>,
    /// Policies seen on slice requests
    pub policies: Mutex<Vec<u8>>,
    pub delay: Mutex<Option<Duration>>,
}

#[derive(Clone)]
pub struct FakeNode {
    pub addr: SocketAddr,
    pub state: Arc<FakeNodeState>,
}

impl FakeNode {
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    pub fn management_paths(&self) -> Vec<String> {
        self.state
            .management_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

#[derive(Deserialize)]
struct PolicyQuery {
    consistency_policy: u8,
}

async fn get_slice(
    State(state): State<Arc<FakeNodeState>>,
    Path(hex): Path<String>,
    Query(q): Query<PolicyQuery>,
) -> impl IntoResponse {
    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    state.policies.lock().unwrap().push(q.consistency_policy);
    match state.slices.lock().unwrap().get(&hex) {
        Some(data) => (StatusCode::OK, data.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn put_slice(
    State(state): State<Arc<FakeNodeState>>,
    Path(hex): Path<String>,
    Query(q): Query<PolicyQuery>,
    body: Bytes,
) -> impl IntoResponse {
    state.policies.lock().unwrap().push(q.consistency_policy);
    state.slices.lock().unwrap().insert(hex, body.to_vec());
    (StatusCode::OK, "ok")
}

async fn management(
    state: Arc<FakeNodeState>,
    path: &str,
    body: Bytes,
) -> impl IntoResponse {
    let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    state
        .management_calls
        .lock()
        .unwrap()
        .push((path.to_string(), value));
    Json(serde_json::json!({ "Ok": null }))
}

/// Start a fake storage node on an ephemeral loopback port
pub async fn spawn_fake_node() -> FakeNode {
    let state = Arc::new(FakeNodeState::default());
    let app = Router::new()
        .route("/slice/:hex", get(get_slice).put(put_slice))
        .route(
            "/init",
            post(|State(s): State<Arc<FakeNodeState>>, body: Bytes| async move {
                management(s, "/init", body).await
            }),
        )
        .route(
            "/add-learner",
            post(|State(s): State<Arc<FakeNodeState>>, body: Bytes| async move {
                management(s, "/add-learner", body).await
            }),
        )
        .route(
            "/change-membership",
            post(|State(s): State<Arc<FakeNodeState>>, body: Bytes| async move {
                management(s, "/change-membership", body).await
            }),
        )
        .with_state(state.clone());

    let addr = serve(app).await;
    FakeNode { addr, state }
}

/// Serve `app` on an ephemeral loopback port
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address on which nothing listens
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Poll `check` every 50ms until it returns true or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
