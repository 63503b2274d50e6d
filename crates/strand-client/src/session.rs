//! Drives one stream attempt through the reconciler.

use tokio::sync::watch;

use strand_core::envelope::Frame;
use strand_core::error::StreamError;
use strand_core::event::EventKind;

use crate::reader::StreamReader;
use crate::reconciler::Reconciler;
use crate::state::ExecutionStatus;

/// How a single stream attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Completed { response: String },
    /// The stream closed cleanly without a terminal event.
    EndedEarly,
    /// The abort signal fired.
    Stopped,
    Failed(StreamError),
}

impl AttemptOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Read frames until the attempt ends, reconciling each one as it arrives.
///
/// A transport failure after content or a response was already received is
/// treated as the server hanging up once it was done, and completes the
/// thread locally. Timeouts always fail the attempt.
pub async fn drive(
    reader: &mut StreamReader,
    reconciler: &mut Reconciler,
    abort: &mut watch::Receiver<bool>,
) -> AttemptOutcome {
    reconciler.begin_attempt();
    if *abort.borrow() {
        return AttemptOutcome::Stopped;
    }

    loop {
        let item = tokio::select! {
            biased;
            changed = abort.changed() => {
                if changed.is_ok() && *abort.borrow() {
                    return AttemptOutcome::Stopped;
                }
                if changed.is_err() {
                    // Nobody can abort any more; keep reading.
                    return drain(reader, reconciler).await;
                }
                continue;
            }
            item = reader.next_frame() => item,
        };

        if let Some(outcome) = step(item, reconciler) {
            return outcome;
        }
    }
}

async fn drain(reader: &mut StreamReader, reconciler: &mut Reconciler) -> AttemptOutcome {
    loop {
        let item = reader.next_frame().await;
        if let Some(outcome) = step(item, reconciler) {
            return outcome;
        }
    }
}

fn step(
    item: Option<Result<Frame, StreamError>>,
    reconciler: &mut Reconciler,
) -> Option<AttemptOutcome> {
    match item {
        None => Some(end_of_stream(reconciler)),
        Some(Ok(frame)) => {
            let terminal = matches!(frame.event.kind, EventKind::GraphEnd { .. });
            match reconciler.process(&frame) {
                Err(err) => Some(AttemptOutcome::Failed(err)),
                Ok(state) if terminal && state.status == ExecutionStatus::Completed => {
                    Some(AttemptOutcome::Completed {
                        response: state.output().to_string(),
                    })
                }
                Ok(_) => None,
            }
        }
        Some(Err(err)) if err.is_transport() && has_meaningful_content(reconciler) => {
            tracing::debug!(error = %err, "connection closed after content, completing locally");
            reconciler.finalize_local();
            Some(AttemptOutcome::Completed {
                response: reconciler.state().output().to_string(),
            })
        }
        Some(Err(err)) => {
            tracing::warn!(error = %err, "stream attempt failed");
            reconciler.mark_failed(&err);
            Some(AttemptOutcome::Failed(err))
        }
    }
}

fn end_of_stream(reconciler: &Reconciler) -> AttemptOutcome {
    let state = reconciler.state();
    if state.status == ExecutionStatus::Completed {
        AttemptOutcome::Completed {
            response: state.output().to_string(),
        }
    } else {
        tracing::debug!(thread_id = ?state.thread_id, "stream ended without graph_end");
        AttemptOutcome::EndedEarly
    }
}

fn has_meaningful_content(reconciler: &Reconciler) -> bool {
    let state = reconciler.state();
    !state.streamed_text.is_empty() || state.response.as_deref().is_some_and(|r| !r.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::{StreamExt, stream};

    use crate::reader::ByteStream;

    fn reader_of(items: Vec<Result<&'static str, StreamError>>) -> StreamReader {
        let items: Vec<Result<Bytes, StreamError>> = items
            .into_iter()
            .map(|r| r.map(|s| Bytes::from_static(s.as_bytes())))
            .collect();
        let inner: ByteStream = Box::pin(stream::iter(items));
        StreamReader::new(inner, Duration::from_secs(60), Duration::from_secs(600))
    }

    fn abort() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn graph_end_completes() {
        let mut reader = reader_of(vec![
            Ok("data: {\"type\":\"graph_start\",\"thread_id\":\"t\"}\n"),
            Ok("data: {\"type\":\"graph_end\",\"thread_id\":\"t\",\"response\":\"done\"}\n"),
        ]);
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = abort();
        let outcome = drive(&mut reader, &mut rec, &mut rx).await;
        assert_eq!(
            outcome,
            AttemptOutcome::Completed {
                response: "done".into()
            }
        );
    }

    #[tokio::test]
    async fn clean_close_without_graph_end_is_early() {
        let mut reader = reader_of(vec![Ok(
            "data: {\"type\":\"node_start\",\"thread_id\":\"t\",\"node\":\"agent\"}\n",
        )]);
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = abort();
        assert_eq!(
            drive(&mut reader, &mut rec, &mut rx).await,
            AttemptOutcome::EndedEarly
        );
        assert_eq!(rec.state().active_node.as_deref(), Some("agent"));
    }

    #[tokio::test]
    async fn reset_after_content_is_benign() {
        let mut reader = reader_of(vec![
            Ok("data: {\"type\":\"content_chunk\",\"thread_id\":\"t\",\"content\":\"partial answer\"}\n"),
            Err(StreamError::Transport("connection closed".into())),
        ]);
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = abort();
        let outcome = drive(&mut reader, &mut rec, &mut rx).await;
        assert!(outcome.is_completed());
        assert_eq!(rec.state().status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn reset_before_content_fails() {
        let mut reader = reader_of(vec![
            Ok("data: {\"type\":\"graph_start\",\"thread_id\":\"t\"}\n"),
            Err(StreamError::Transport("connection refused".into())),
        ]);
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = abort();
        let outcome = drive(&mut reader, &mut rec, &mut rx).await;
        assert!(matches!(outcome, AttemptOutcome::Failed(StreamError::Transport(_))));
        assert_eq!(rec.state().status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn server_error_fails_with_partial_state() {
        let mut reader = reader_of(vec![
            Ok("data: {\"type\":\"node_start\",\"thread_id\":\"t\",\"node\":\"agent\"}\n"),
            Ok("data: {\"type\":\"error\",\"thread_id\":\"t\",\"error\":\"Recursion limit (2) exceeded\",\"error_type\":\"recursion_limit\"}\n"),
        ]);
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = abort();
        let outcome = drive(&mut reader, &mut rec, &mut rx).await;
        assert!(matches!(
            outcome,
            AttemptOutcome::Failed(StreamError::Server { ref error_type, .. }) if error_type == "recursion_limit"
        ));
        assert!(rec.state().visited.contains("agent"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_after_content_is_not_benign() {
        let items: Vec<Result<Bytes, StreamError>> = vec![Ok(Bytes::from_static(
            b"data: {\"type\":\"content_chunk\",\"thread_id\":\"t\",\"content\":\"x\"}\n",
        ))];
        let inner: ByteStream = Box::pin(stream::iter(items).chain(stream::pending()));
        let mut reader = StreamReader::new(inner, Duration::from_secs(5), Duration::from_secs(60));
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = abort();

        let outcome = drive(&mut reader, &mut rec, &mut rx).await;
        assert!(matches!(
            outcome,
            AttemptOutcome::Failed(StreamError::InactivityTimeout { .. })
        ));
        assert_eq!(rec.state().streamed_text, "x");
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_the_attempt() {
        let inner: ByteStream = Box::pin(stream::pending());
        let mut reader = StreamReader::new(inner, Duration::from_secs(600), Duration::from_secs(600));
        let mut rec = Reconciler::default();
        let (tx, mut rx) = abort();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send_replace(true);
        });
        assert_eq!(
            drive(&mut reader, &mut rec, &mut rx).await,
            AttemptOutcome::Stopped
        );
    }
}
