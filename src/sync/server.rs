//! Coordination service
//!
//! Small HTTP service shared by the workers of one machine. The first worker
//! to register for a test run becomes its master; the latest in-progress
//! snapshot of each autotest is kept per run.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct RunState {
    master: String,
    workers: Vec<String>,
    /// Latest snapshot per `autoTestExternalId`
    in_progress: IndexMap<String, serde_json::Value>,
}

/// Shared state of the coordination service
#[derive(Default)]
pub struct SyncStorageState {
    runs: Mutex<IndexMap<String, RunState>>,
}

impl SyncStorageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker; returns whether it is the run's master
    pub fn register(&self, pid: &str, test_run_id: &str) -> bool {
        let mut runs = self.runs.lock();
        let run = runs.entry(test_run_id.to_string()).or_default();
        if run.master.is_empty() {
            run.master = pid.to_string();
        }
        if !run.workers.iter().any(|w| w == pid) {
            run.workers.push(pid.to_string());
        }
        run.master == pid
    }

    /// Store a snapshot, replacing an earlier one for the same autotest
    pub fn push_in_progress(&self, test_run_id: &str, result: serde_json::Value) {
        let external_id = result
            .get("autoTestExternalId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut runs = self.runs.lock();
        let snapshots = &mut runs.entry(test_run_id.to_string()).or_default().in_progress;
        // re-inserted at the end so listing order follows the latest snapshots
        snapshots.shift_remove(&external_id);
        snapshots.insert(external_id, result);
    }

    pub fn in_progress(&self, test_run_id: &str) -> Vec<serde_json::Value> {
        self.runs
            .lock()
            .get(test_run_id)
            .map(|run| run.in_progress.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    pid: String,
    test_run_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    is_master: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InProgressRequest {
    test_run_id: String,
    result_payload: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InProgressQuery {
    test_run_id: String,
}

/// Routes of the coordination service
pub fn router(state: Arc<SyncStorageState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route(
            "/results/in-progress",
            post(push_in_progress_handler).get(list_in_progress_handler),
        )
        .with_state(state)
}

/// Serve the coordination service on localhost until the process exits
pub async fn serve(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Coordination service listening on {}", addr);
    axum::serve(listener, router(Arc::new(SyncStorageState::new()))).await
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn register_handler(
    State(state): State<Arc<SyncStorageState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let is_master = state.register(&req.pid, &req.test_run_id);
    debug!(
        "Worker {} registered for {} (master: {})",
        req.pid, req.test_run_id, is_master
    );
    Json(RegisterResponse { is_master })
}

async fn push_in_progress_handler(
    State(state): State<Arc<SyncStorageState>>,
    Json(req): Json<InProgressRequest>,
) -> impl IntoResponse {
    state.push_in_progress(&req.test_run_id, req.result_payload);
    StatusCode::OK
}

async fn list_in_progress_handler(
    State(state): State<Arc<SyncStorageState>>,
    Query(query): Query<InProgressQuery>,
) -> impl IntoResponse {
    Json(state.in_progress(&query.test_run_id))
}
