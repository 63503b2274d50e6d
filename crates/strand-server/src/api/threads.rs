use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::{get, post}};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use strand_core::protocol::{StartRequest, StopAck, ThreadStatus};

use crate::error::AppError;
use crate::executor::{Launch, LaunchRequest, launch};
use crate::sse::sse_response;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/threads", post(start_thread).get(list_threads))
        .route("/stop/{thread_id}", post(stop_thread))
        .route("/resume/{thread_id}", post(resume_thread))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResumeQuery {
    #[serde(default)]
    pub detached: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub status: ThreadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

fn respond(state: &AppState, launched: Launch) -> Response {
    match launched {
        Launch::Attached(rx) => sse_response(rx, state.config.wire_format).into_response(),
        Launch::Detached(job) => Json(job).into_response(),
    }
}

async fn start_thread(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Response, AppError> {
    let thread_id = match req.thread_id {
        Some(id) if id.trim().is_empty() => {
            return Err(AppError::BadRequest("thread_id must not be empty".into()));
        }
        Some(id) => id,
        None => Uuid::new_v4().to_string(),
    };

    let launched = launch(
        &state,
        LaunchRequest::start(thread_id, req.input).detached(req.detached),
    )
    .await?;
    Ok(respond(&state, launched))
}

async fn resume_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<ResumeQuery>,
) -> Result<Response, AppError> {
    if state.registry.status(&thread_id).await == Some(ThreadStatus::Running) {
        return Err(AppError::Conflict(format!(
            "Thread {thread_id} is already running"
        )));
    }
    let checkpoint = state
        .checkpoint_store
        .get(&thread_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No checkpoint for thread {thread_id}")))?;

    let launched = launch(
        &state,
        LaunchRequest::resume(checkpoint).detached(query.detached),
    )
    .await?;
    Ok(respond(&state, launched))
}

async fn stop_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<StopAck>, AppError> {
    let stopped = state.registry.stop(&thread_id).await;
    let status = match state.registry.status(&thread_id).await {
        Some(status) => status,
        None => match state.checkpoint_store.get(&thread_id).await? {
            Some(cp) if cp.completed => ThreadStatus::Completed,
            Some(_) => ThreadStatus::Stopped,
            None => return Err(AppError::NotFound(format!("Unknown thread {thread_id}"))),
        },
    };
    Ok(Json(StopAck {
        thread_id,
        stopped,
        status,
    }))
}

async fn list_threads(State(state): State<AppState>) -> Json<Vec<ThreadSummary>> {
    let threads = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|entry| ThreadSummary {
            thread_id: entry.thread_id,
            status: entry.status,
            job_id: entry.job_id,
            started_at: entry.started_at,
        })
        .collect();
    Json(threads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use strand_checkpoint::prelude::Checkpoint;
    use strand_core::envelope::decode;
    use strand_core::protocol::JobAccepted;

    use crate::config::ServerConfig;
    use crate::runner::{ScriptedRunner, ScriptedStep};

    fn test_state(steps: Vec<ScriptedStep>) -> AppState {
        AppState::new(ServerConfig::default()).with_runner(Arc::new(ScriptedRunner::new(steps)))
    }

    fn test_app(state: AppState) -> Router {
        Router::new().nest("/api", routes().with_state(state))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn sse_types(resp: Response) -> Vec<String> {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .filter_map(decode)
            .map(|frame| frame.event.type_name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn start_streams_events() {
        let app = test_app(test_state(vec![ScriptedStep::new("agent").with_model("m")]));
        let resp = app
            .oneshot(post_json("/api/threads", json!({"thread_id": "t-1", "input": "hi"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let types = sse_types(resp).await;
        assert_eq!(types.first().map(String::as_str), Some("graph_start"));
        assert_eq!(types.last().map(String::as_str), Some("graph_end"));
        assert!(types.contains(&"node_start".to_string()));
    }

    #[tokio::test]
    async fn start_detached_returns_job() {
        let app = test_app(test_state(vec![ScriptedStep::new("agent")]));
        let resp = app
            .oneshot(post_json("/api/threads", json!({"input": {}, "detached": true})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let job: JobAccepted = serde_json::from_slice(&bytes).unwrap();
        assert!(!job.job_id.is_empty());
        assert!(Uuid::parse_str(&job.thread_id).is_ok());
    }

    #[tokio::test]
    async fn start_running_thread_conflicts() {
        let state = test_state(vec![ScriptedStep::new("slow").with_delay(10_000)]);
        let app = test_app(state.clone());
        let first = app
            .clone()
            .oneshot(post_json("/api/threads", json!({"thread_id": "t-1", "detached": true})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(post_json("/api/threads", json!({"thread_id": "t-1"})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        state.registry.stop("t-1").await;
    }

    #[tokio::test]
    async fn empty_thread_id_is_rejected() {
        let app = test_app(test_state(vec![]));
        let resp = app
            .oneshot(post_json("/api/threads", json!({"thread_id": " "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn resume_without_checkpoint_is_404() {
        let app = test_app(test_state(vec![]));
        let resp = app.oneshot(post_empty("/api/resume/missing")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn resume_streams_snapshot_then_remaining_nodes() {
        let state = test_state(vec![
            ScriptedStep::new("agent"),
            ScriptedStep::new("writer"),
        ]);
        let mut cp = Checkpoint::new("t-9");
        cp.record_node("agent");
        state.checkpoint_store.put(cp).await.unwrap();

        let resp = test_app(state.clone())
            .oneshot(post_empty("/api/resume/t-9"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let types = sse_types(resp).await;
        assert_eq!(&types[..2], &["graph_start", "state_snapshot"]);
        assert_eq!(types.last().map(String::as_str), Some("graph_end"));

        let cp = state.checkpoint_store.get("t-9").await.unwrap().unwrap();
        assert_eq!(cp.visited_nodes, vec!["agent", "writer"]);
        assert!(cp.completed);
    }

    #[tokio::test]
    async fn resume_detached_returns_job() {
        let state = test_state(vec![ScriptedStep::new("agent")]);
        state
            .checkpoint_store
            .put(Checkpoint::new("t-8"))
            .await
            .unwrap();
        let resp = test_app(state)
            .oneshot(post_empty("/api/resume/t-8?detached=true"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let job: JobAccepted = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(job.thread_id, "t-8");
    }

    #[tokio::test]
    async fn stop_running_thread() {
        let state = test_state(vec![ScriptedStep::new("slow").with_delay(10_000)]);
        let app = test_app(state.clone());
        app.clone()
            .oneshot(post_json("/api/threads", json!({"thread_id": "t-1", "detached": true})))
            .await
            .unwrap();

        let resp = app.oneshot(post_empty("/api/stop/t-1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let ack: StopAck = serde_json::from_slice(&bytes).unwrap();
        assert!(ack.stopped);
        assert_eq!(ack.status, ThreadStatus::Stopped);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state.registry.status("t-1").await, Some(ThreadStatus::Stopped));
    }

    #[tokio::test]
    async fn stop_unknown_thread_is_404() {
        let app = test_app(test_state(vec![]));
        let resp = app.oneshot(post_empty("/api/stop/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_threads_reports_registry() {
        let state = test_state(vec![ScriptedStep::new("agent")]);
        state.registry.begin("t-1", Some("job".into())).await.unwrap();

        let resp = test_app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/threads")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let list: Vec<ThreadSummary> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, ThreadStatus::Running);
        assert_eq!(list[0].job_id.as_deref(), Some("job"));
    }
}
