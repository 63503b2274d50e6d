//! Client against a live server on a loopback port.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;

use strand_client::prelude::*;
use strand_core::prelude::{StreamError, WireFormat};
use strand_server::runner::{ScriptedRunner, ScriptedStep};
use strand_server::{AppState, ServerConfig, app_router};

async fn serve(config: ServerConfig, steps: Vec<ScriptedStep>) -> String {
    let state = AppState::new(config).with_runner(Arc::new(ScriptedRunner::new(steps)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn controller(base_url: &str) -> ThreadController {
    let config = ClientConfig::new(base_url).with_poll_interval(Duration::from_millis(20));
    ThreadController::with_api(ApiClient::new(base_url), config)
}

fn two_steps() -> Vec<ScriptedStep> {
    vec![
        ScriptedStep::new("agent")
            .with_model("flash")
            .with_chunks(&["Hello, ", "world"]),
        ScriptedStep::new("tools").with_tool("search"),
    ]
}

async fn wait_until(ctl: &ThreadController, pred: impl Fn(&ExecutionState) -> bool) {
    let mut rx = ctl.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
        .await
        .expect("condition not reached in time")
        .unwrap();
}

#[tokio::test]
async fn attached_run_streams_to_completion() {
    for format in [WireFormat::Envelope, WireFormat::Legacy] {
        let url = serve(ServerConfig::default().with_wire_format(format), two_steps()).await;
        let ctl = controller(&url);

        let outcome = ctl.start(None, json!({"topic": "rust"}), false).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Streamed(AttemptOutcome::Completed {
                response: "Hello, world".into()
            })
        );

        let state = ctl.state();
        assert!(state.thread_id.is_some());
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.visited.iter().collect::<Vec<_>>(), vec!["agent", "tools"]);
        assert!(state.next.is_empty());
        assert_eq!(state.active_node, None);
        assert_eq!(state.output(), "Hello, world");
        assert_eq!(state.message_count, 2);

        let activity = state.node_activity();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].llm_calls, vec!["flash"]);
        assert_eq!(activity[1].tool_calls, vec!["search"]);
    }
}

#[tokio::test]
async fn detached_run_is_followed_by_polling() {
    let url = serve(ServerConfig::default(), two_steps()).await;
    let ctl = controller(&url);

    let outcome = ctl.start(Some("t-detached"), json!({}), true).await.unwrap();
    assert_eq!(outcome, Outcome::Polled(PollOutcome::Finished(ExecutionStatus::Completed)));

    let state = ctl.state();
    assert_eq!(state.thread_id.as_deref(), Some("t-detached"));
    assert_eq!(state.status, ExecutionStatus::Completed);
    assert!(state.visited.contains("agent"));
    assert!(state.visited.contains("tools"));
    assert_eq!(state.active_node, None);
}

#[tokio::test]
async fn stop_then_resume_finishes_under_the_same_id() {
    let url = serve(
        ServerConfig::default(),
        vec![
            ScriptedStep::new("agent").with_model("flash").with_chunks(&["draft"]),
            ScriptedStep::new("slow").with_delay(500),
            ScriptedStep::new("writer").with_model("flash").with_chunks(&[" final"]),
        ],
    )
    .await;
    let ctl = controller(&url);

    let runner = ctl.clone();
    let run = tokio::spawn(async move { runner.start(Some("t-stop"), json!({}), false).await });
    wait_until(&ctl, |s| s.active_node.as_deref() == Some("slow")).await;

    let ack = ctl.stop().await.unwrap().expect("server knows the thread");
    assert!(ack.stopped);
    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome, Outcome::Streamed(AttemptOutcome::Stopped));

    let stopped = ctl.state();
    assert_eq!(stopped.status, ExecutionStatus::Stopped);
    assert_eq!(stopped.thread_id.as_deref(), Some("t-stop"));
    assert!(stopped.visited.contains("agent"));
    let logged = stopped.stream_events.len();
    assert!(logged > 0);

    let outcome = ctl.resume("t-stop", false).await.unwrap();
    assert!(matches!(outcome, Outcome::Streamed(ref o) if o.is_completed()));

    let state = ctl.state();
    assert_eq!(state.status, ExecutionStatus::Completed);
    for node in ["agent", "slow", "writer"] {
        assert!(state.visited.contains(node), "missing {node}");
    }
    assert!(state.stream_events.len() > logged);
    assert!(state.output().ends_with("final"));
}

#[tokio::test]
async fn attach_rebuilds_a_finished_thread() {
    let url = serve(ServerConfig::default(), two_steps()).await;
    let first = controller(&url);
    first.start(Some("t-reload"), json!({}), false).await.unwrap();

    let second = controller(&url);
    let outcome = second.attach("t-reload").await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Attached(Attachment::Finished(ExecutionStatus::Completed))
    );

    let state = second.state();
    assert_eq!(state.thread_id.as_deref(), Some("t-reload"));
    assert_eq!(state.visited, first.state().visited);
    assert_eq!(state.message_count, first.state().message_count);
    assert!(state.next.is_empty());
}

#[tokio::test]
async fn attach_to_unknown_thread_is_fresh() {
    let url = serve(ServerConfig::default(), two_steps()).await;
    let ctl = controller(&url);
    let outcome = ctl.attach("t-never").await.unwrap();
    assert_eq!(outcome, Outcome::Attached(Attachment::Fresh));
    assert_eq!(ctl.state().status, ExecutionStatus::Idle);
}

#[tokio::test]
async fn failing_node_surfaces_server_error() {
    let url = serve(
        ServerConfig::default(),
        vec![ScriptedStep::new("agent").failing("model refused")],
    )
    .await;
    let ctl = controller(&url);

    let outcome = ctl.start(Some("t-fail"), json!({}), false).await.unwrap();
    match outcome {
        Outcome::Streamed(AttemptOutcome::Failed(StreamError::Server { error, .. })) => {
            assert!(error.contains("model refused"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let state = ctl.state();
    assert_eq!(state.status, ExecutionStatus::Failed);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn resume_unknown_thread_is_not_found() {
    let url = serve(ServerConfig::default(), two_steps()).await;
    let ctl = controller(&url);
    let err = ctl.resume("t-missing", false).await.unwrap_err();
    assert!(matches!(err, StreamError::NotFound(_)));
}
