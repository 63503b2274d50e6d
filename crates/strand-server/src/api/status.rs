use axum::extract::{Path, Query, State};
use axum::{Json, Router, routing::get};
use serde::Deserialize;
use serde_json::Value;

use strand_core::protocol::{LoadResponse, Progress, StatusResponse, ThreadStatus};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status/{thread_id}", get(thread_status))
        .route("/load/{thread_id}", get(load_thread))
        .route("/state", get(thread_state))
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub thread_id: String,
}

/// Registry status when the thread ran on this process, checkpoint otherwise.
async fn thread_status(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let entry = state.registry.get(&thread_id).await;
    let checkpoint = state.checkpoint_store.get(&thread_id).await?;
    tracing::debug!(thread_id = %thread_id, known = entry.is_some(), "status requested");

    let status = match (&entry, &checkpoint) {
        (Some(entry), _) => entry.status,
        (None, Some(cp)) if cp.completed => ThreadStatus::Completed,
        (None, Some(_)) => ThreadStatus::Stopped,
        (None, None) => return Ok(Json(StatusResponse::not_found())),
    };

    Ok(Json(StatusResponse {
        status,
        graph_state: checkpoint
            .as_ref()
            .map(|cp| cp.graph_state())
            .unwrap_or_default(),
        state: checkpoint.map(|cp| cp.state).unwrap_or(Value::Null),
        progress: entry
            .as_ref()
            .map(|e| e.log.progress())
            .unwrap_or_else(Progress::default),
        error: entry.and_then(|e| e.error),
    }))
}

async fn load_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<LoadResponse>, AppError> {
    load(&state, &thread_id).await
}

async fn thread_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<LoadResponse>, AppError> {
    load(&state, &query.thread_id).await
}

async fn load(state: &AppState, thread_id: &str) -> Result<Json<LoadResponse>, AppError> {
    state
        .checkpoint_store
        .get(thread_id)
        .await?
        .map(|cp| Json(cp.to_load_response()))
        .ok_or_else(|| AppError::NotFound(format!("No checkpoint for thread {thread_id}")))
}
