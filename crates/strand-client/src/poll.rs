//! Status polling for threads with no push stream.

use std::time::Duration;

use tokio::sync::watch;

use strand_core::error::StreamError;
use strand_core::protocol::ThreadStatus;

use crate::config::ClientConfig;
use crate::reconciler::Reconciler;
use crate::resume::StatusSource;
use crate::state::ExecutionStatus;

const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The server reported a status polling cannot move past.
    Finished(ExecutionStatus),
    /// The server no longer knows the thread.
    NotFound,
    /// The abort signal fired.
    Stopped,
    Failed(StreamError),
}

#[derive(Debug, Clone)]
pub struct PollCoordinator {
    interval: Duration,
    max_failures: u32,
}

impl PollCoordinator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_failures: MAX_CONSECUTIVE_FAILURES,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.poll_interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One poll: fetch the status and merge it. Returns the server's status.
    pub async fn tick<S: StatusSource + ?Sized>(
        &self,
        source: &S,
        thread_id: &str,
        reconciler: &mut Reconciler,
    ) -> Result<ThreadStatus, StreamError> {
        let resp = source.status(thread_id).await?;
        tracing::debug!(thread_id, status = %resp.status, "poll");
        reconciler.merge_status(&resp);
        Ok(resp.status)
    }

    /// Poll every interval until the thread finishes or `abort` fires.
    ///
    /// Transient failures are retried; the run gives up after several in a row.
    pub async fn run<S: StatusSource + ?Sized>(
        &self,
        source: &S,
        thread_id: &str,
        reconciler: &mut Reconciler,
        abort: &mut watch::Receiver<bool>,
    ) -> PollOutcome {
        let mut failures = 0;
        loop {
            if *abort.borrow() {
                return PollOutcome::Stopped;
            }

            match self.tick(source, thread_id, reconciler).await {
                Ok(ThreadStatus::NotFound) => return PollOutcome::NotFound,
                Ok(_) => {
                    failures = 0;
                    let status = reconciler.state().status;
                    if status.is_finished() {
                        return PollOutcome::Finished(status);
                    }
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(thread_id, error = %err, failures, "poll failed");
                    if failures >= self.max_failures {
                        return PollOutcome::Failed(err);
                    }
                }
            }

            tokio::select! {
                biased;
                changed = abort.changed() => {
                    if changed.is_ok() && *abort.borrow() {
                        return PollOutcome::Stopped;
                    }
                    if changed.is_err() {
                        tokio::time::sleep(self.interval).await;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use strand_core::protocol::StatusResponse;

    use crate::resume::tests::{FakeServer, status};

    #[tokio::test(start_paused = true)]
    async fn polls_until_completed() {
        let server = FakeServer::default().with_statuses(
            "t",
            vec![
                status(ThreadStatus::Running, &["planner"], &[]),
                status(ThreadStatus::Running, &["writer"], &["planner"]),
                status(ThreadStatus::Completed, &[], &["planner", "writer"]),
            ],
        );
        let poller = PollCoordinator::new(Duration::from_secs(3));
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        let outcome = poller.run(&server, "t", &mut rec, &mut rx).await;

        assert_eq!(outcome, PollOutcome::Finished(ExecutionStatus::Completed));
        assert_eq!(started.elapsed(), Duration::from_secs(6));
        assert_eq!(rec.state().visited.len(), 2);
        assert_eq!(rec.state().active_node, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_polling_and_is_not_regressed() {
        let server = Arc::new(
            FakeServer::default()
                .with_statuses("t", vec![status(ThreadStatus::Running, &["writer"], &["planner"])]),
        );
        let poller = PollCoordinator::new(Duration::from_secs(3));
        let mut rec = Reconciler::default();
        let (tx, mut rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            tx.send_replace(true);
        });
        let outcome = poller.run(server.as_ref(), "t", &mut rec, &mut rx).await;
        assert_eq!(outcome, PollOutcome::Stopped);

        rec.mark_stopped();
        poller.tick(server.as_ref(), "t", &mut rec).await.unwrap();
        assert_eq!(rec.state().status, ExecutionStatus::Stopped);
        assert!(rec.state().visited.contains("planner"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_thread_ends_polling() {
        let poller = PollCoordinator::new(Duration::from_secs(3));
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = watch::channel(false);
        let outcome = poller
            .run(&FakeServer::default(), "ghost", &mut rec, &mut rx)
            .await;
        assert_eq!(outcome, PollOutcome::NotFound);
    }

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl StatusSource for Flaky {
        async fn status(&self, _thread_id: &str) -> Result<StatusResponse, StreamError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(StreamError::Transport("503".into()))
            } else {
                Ok(status(ThreadStatus::Completed, &[], &["agent"]))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let source = Flaky {
            calls: AtomicU32::new(0),
            fail_first: 2,
        };
        let poller = PollCoordinator::new(Duration::from_secs(1));
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = watch::channel(false);
        let outcome = poller.run(&source, "t", &mut rec, &mut rx).await;
        assert_eq!(outcome, PollOutcome::Finished(ExecutionStatus::Completed));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failures_give_up() {
        let source = Flaky {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        };
        let poller = PollCoordinator::new(Duration::from_secs(1));
        let mut rec = Reconciler::default();
        let (_tx, mut rx) = watch::channel(false);
        let outcome = poller.run(&source, "t", &mut rec, &mut rx).await;
        assert!(matches!(outcome, PollOutcome::Failed(StreamError::Transport(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), MAX_CONSECUTIVE_FAILURES);
    }
}
