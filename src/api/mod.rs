use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::calibration::{Registry, Runnable};
use crate::error::{Result, RunnerError};
use crate::scheduler::{AdmissionGate, RunRecord, RunState, WorkflowStatus};

#[derive(Clone)]
pub struct ApiState {
    pub gate: Arc<AdmissionGate>,
    pub run_state: Arc<RunState>,
    pub registry: Arc<dyn Registry>,
}

#[derive(Deserialize)]
struct NameQuery {
    name: String,
}

#[derive(Deserialize)]
struct RescanQuery {
    #[serde(default)]
    rescan: bool,
}

impl IntoResponse for RunnerError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            RunnerError::AlreadyRunning => (StatusCode::CONFLICT, json!("Already running")),
            RunnerError::InvalidInput(errors) => (StatusCode::UNPROCESSABLE_ENTITY, json!(errors)),
            e @ (RunnerError::NodeNotFound(_) | RunnerError::WorkflowNotFound(_)) => {
                (StatusCode::NOT_FOUND, json!(e.to_string()))
            }
            e => (StatusCode::INTERNAL_SERVER_ERROR, json!(e.to_string())),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// All routes of the runner API.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/is_running", get(is_running_handler))
        .route("/last_run", get(last_run_handler))
        .route("/workflow/status", get(workflow_status_handler))
        .route("/submit/node", post(submit_node_handler))
        .route("/submit/workflow", post(submit_workflow_handler))
        .route("/get_nodes", get(list_nodes_handler))
        .route("/get_node", get(get_node_handler))
        .route("/get_workflows", get(list_workflows_handler))
        .route("/get_workflow", get(get_workflow_handler))
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    cors_permissive: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut app = router(state);
    if cors_permissive {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
        e
    })?;
    tracing::info!(addr = %addr, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn is_running_handler(State(state): State<ApiState>) -> Json<bool> {
    Json(state.run_state.is_running())
}

async fn last_run_handler(State(state): State<ApiState>) -> Json<Option<RunRecord>> {
    Json(state.run_state.last_run().map(|r| (*r).clone()))
}

async fn workflow_status_handler(State(state): State<ApiState>) -> Json<Option<WorkflowStatus>> {
    Json(state.run_state.workflow_status())
}

async fn submit_node_handler(
    State(state): State<ApiState>,
    Query(query): Query<NameQuery>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<String>)> {
    let node = state
        .registry
        .node(&query.name)
        .ok_or_else(|| RunnerError::NodeNotFound(query.name.clone()))?;
    let message = state.gate.submit(Runnable::Node(node), &payload)?;
    Ok((StatusCode::ACCEPTED, Json(message)))
}

async fn submit_workflow_handler(
    State(state): State<ApiState>,
    Query(query): Query<NameQuery>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<String>)> {
    let workflow = state
        .registry
        .workflow(&query.name)
        .ok_or_else(|| RunnerError::WorkflowNotFound(query.name.clone()))?;
    let message = state.gate.submit(Runnable::Workflow(workflow), &payload)?;
    Ok((StatusCode::ACCEPTED, Json(message)))
}

async fn list_nodes_handler(
    State(state): State<ApiState>,
    Query(query): Query<RescanQuery>,
) -> Json<BTreeMap<String, Value>> {
    if query.rescan {
        state.registry.rescan();
    }
    Json(
        state
            .registry
            .nodes()
            .into_iter()
            .map(|node| (node.name().to_string(), node.serialize()))
            .collect(),
    )
}

async fn get_node_handler(
    State(state): State<ApiState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Value>> {
    let node = state
        .registry
        .node(&query.name)
        .ok_or(RunnerError::NodeNotFound(query.name))?;
    Ok(Json(node.serialize()))
}

async fn list_workflows_handler(
    State(state): State<ApiState>,
    Query(query): Query<RescanQuery>,
) -> Json<BTreeMap<String, Value>> {
    if query.rescan {
        state.registry.rescan();
    }
    Json(
        state
            .registry
            .workflows()
            .into_iter()
            .map(|workflow| (workflow.name().to_string(), workflow.serialize()))
            .collect(),
    )
}

async fn get_workflow_handler(
    State(state): State<ApiState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Value>> {
    let workflow = state
        .registry
        .workflow(&query.name)
        .ok_or(RunnerError::WorkflowNotFound(query.name))?;
    Ok(Json(workflow.serialize()))
}
