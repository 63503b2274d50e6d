//! Start, stop, resume and attach to threads from one handle.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use strand_core::error::StreamError;
use strand_core::protocol::StopAck;

use crate::client::{ApiClient, StartResponse};
use crate::config::ClientConfig;
use crate::poll::{PollCoordinator, PollOutcome};
use crate::reader::StreamReader;
use crate::reconciler::Reconciler;
use crate::resume::{Attachment, ResumeCoordinator};
use crate::session::{AttemptOutcome, drive};
use crate::state::ExecutionState;

/// How a controller operation left the thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A push stream was followed to its end.
    Streamed(AttemptOutcome),
    /// A detached run was followed by polling.
    Polled(PollOutcome),
    /// Attached to a thread with nothing left to follow.
    Attached(Attachment),
}

/// Composes the HTTP client, the reconciler and an abort handle.
///
/// Cheap to clone; clones share the same thread state, so one task can
/// `start` while another calls `stop`.
#[derive(Clone)]
pub struct ThreadController {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<ApiClient>,
    config: ClientConfig,
    reconciler: Mutex<Reconciler>,
    abort: watch::Sender<bool>,
    updates: watch::Receiver<ExecutionState>,
}

impl ThreadController {
    pub fn new(config: ClientConfig) -> Self {
        let api = ApiClient::from_config(&config);
        Self::with_api(api, config)
    }

    pub fn with_api(api: ApiClient, config: ClientConfig) -> Self {
        let reconciler = Reconciler::new(&config);
        let updates = reconciler.subscribe();
        let (abort, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                api: Arc::new(api),
                config,
                reconciler: Mutex::new(reconciler),
                abort,
                updates,
            }),
        }
    }

    /// Latest reconciled state. Never waits on a running stream.
    pub fn state(&self) -> ExecutionState {
        self.inner.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.inner.updates.clone()
    }

    pub fn thread_id(&self) -> Option<String> {
        self.inner.updates.borrow().thread_id.clone()
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub async fn on_report_state(&self, hook: impl Fn(&Value) + Send + Sync + 'static) {
        self.inner.reconciler.lock().await.on_report_state(hook);
    }

    /// Start a new thread and follow it until it ends or is stopped.
    ///
    /// Without a `thread_id` the server assigns one, adopted from the first event.
    pub async fn start(
        &self,
        thread_id: Option<&str>,
        input: Value,
        detached: bool,
    ) -> Result<Outcome, StreamError> {
        let mut abort = self.arm();
        let mut rec = self.inner.reconciler.lock().await;
        rec.begin(thread_id.map(String::from));

        let response = self.inner.api.start(thread_id, input, detached).await?;
        Ok(self.follow(response, &mut rec, &mut abort).await)
    }

    /// Cancel the local reader and ask the server to stop.
    ///
    /// Reconciled state, the event log and the thread id are all kept so the
    /// thread can be resumed.
    pub async fn stop(&self) -> Result<Option<StopAck>, StreamError> {
        self.inner.abort.send_replace(true);
        let thread_id = self.thread_id();

        let ack = match &thread_id {
            Some(id) => self.inner.api.stop(id).await,
            None => Ok(None),
        };
        self.inner.reconciler.lock().await.mark_stopped();
        tracing::info!(thread_id = ?thread_id, "thread stopped");
        ack
    }

    /// Resume a stopped thread under the same id.
    ///
    /// Status is marked running before the server answers. If this controller
    /// holds a different thread, it is first rehydrated from the checkpoint.
    pub async fn resume(&self, thread_id: &str, detached: bool) -> Result<Outcome, StreamError> {
        let mut abort = self.arm();
        let mut rec = self.inner.reconciler.lock().await;
        if rec.state().thread_id.as_deref() != Some(thread_id) {
            self.coordinator().rehydrate(thread_id, &mut rec).await?;
        }
        rec.mark_running();

        let response = match self.inner.api.resume(thread_id, detached).await {
            Ok(response) => response,
            Err(err) => {
                rec.mark_failed(&err);
                return Err(err);
            }
        };
        Ok(self.follow(response, &mut rec, &mut abort).await)
    }

    /// Attach to a thread this controller did not start, e.g. after a reload.
    ///
    /// State is rebuilt from the checkpoint; a thread still running is then
    /// followed by polling.
    pub async fn attach(&self, thread_id: &str) -> Result<Outcome, StreamError> {
        let mut abort = self.arm();
        let mut rec = self.inner.reconciler.lock().await;
        match self.coordinator().attach(thread_id, &mut rec).await? {
            Attachment::Running => {
                let poller = PollCoordinator::from_config(&self.inner.config);
                let outcome = poller
                    .run(self.inner.api.as_ref(), thread_id, &mut rec, &mut abort)
                    .await;
                Ok(Outcome::Polled(outcome))
            }
            other => Ok(Outcome::Attached(other)),
        }
    }

    /// Clear a completed live state once its grace period is over.
    pub async fn sweep(&self) -> bool {
        self.inner.reconciler.lock().await.sweep(Instant::now())
    }

    /// Keep the current state as a fixed report.
    pub async fn pin_report(&self) {
        self.inner.reconciler.lock().await.pin_report();
    }

    fn arm(&self) -> watch::Receiver<bool> {
        self.inner.abort.send_replace(false);
        self.inner.abort.subscribe()
    }

    fn coordinator(&self) -> ResumeCoordinator {
        ResumeCoordinator::new(self.inner.api.clone(), self.inner.api.clone())
    }

    async fn follow(
        &self,
        response: StartResponse,
        rec: &mut Reconciler,
        abort: &mut watch::Receiver<bool>,
    ) -> Outcome {
        match response {
            StartResponse::Stream(bytes) => {
                let mut reader = StreamReader::from_config(bytes, &self.inner.config);
                let outcome = drive(&mut reader, rec, abort).await;
                if reader.malformed() > 0 {
                    tracing::debug!(skipped = reader.malformed(), "malformed frames skipped");
                }
                Outcome::Streamed(outcome)
            }
            StartResponse::Job(job) => {
                tracing::info!(thread_id = %job.thread_id, job_id = %job.job_id, "following detached job");
                if rec.state().thread_id.as_deref() != Some(job.thread_id.as_str()) {
                    rec.begin(Some(job.thread_id.clone()));
                }
                rec.mark_running();
                let poller = PollCoordinator::from_config(&self.inner.config);
                let outcome = poller
                    .run(self.inner.api.as_ref(), &job.thread_id, rec, abort)
                    .await;
                Outcome::Polled(outcome)
            }
        }
    }
}
