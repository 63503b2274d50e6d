//! Launching thread runs in the background.
//!
//! Every run executes on its own task, independent of the HTTP request that
//! started it. An attached caller receives the live queue; a detached caller
//! gets a job id and follows along through status polling.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use strand_checkpoint::prelude::Checkpoint;
use strand_core::error::{Result, StrandError};
use strand_core::protocol::{JobAccepted, ThreadStatus};

use crate::emitter::Emitter;
use crate::error::AppError;
use crate::guard::StepCounter;
use crate::keepalive::spawn_keepalive;
use crate::queue::{self, QueueReceiver};
use crate::registry::ThreadRegistry;
use crate::runner::RunContext;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub thread_id: String,
    pub input: Value,
    /// Continue from this checkpoint instead of starting fresh.
    pub resume_from: Option<Checkpoint>,
    pub detached: bool,
}

impl LaunchRequest {
    pub fn start(thread_id: impl Into<String>, input: Value) -> Self {
        Self {
            thread_id: thread_id.into(),
            input,
            resume_from: None,
            detached: false,
        }
    }

    pub fn resume(checkpoint: Checkpoint) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            input: Value::Null,
            resume_from: Some(checkpoint),
            detached: false,
        }
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }
}

pub enum Launch {
    Attached(QueueReceiver),
    Detached(JobAccepted),
}

/// Admit and start a run. Fails with a conflict if the thread is already running.
pub async fn launch(state: &AppState, req: LaunchRequest) -> std::result::Result<Launch, AppError> {
    let job_id = req.detached.then(|| Uuid::new_v4().to_string());
    let registration = state.registry.begin(&req.thread_id, job_id.clone()).await?;

    let resumed = req.resume_from.is_some();
    let checkpoint = match &req.resume_from {
        Some(cp) => cp.clone(),
        None => {
            let cp = Checkpoint::new(&req.thread_id);
            if let Err(e) = state.checkpoint_store.put(cp.clone()).await {
                state
                    .registry
                    .finish(
                        &req.thread_id,
                        registration.run_id,
                        ThreadStatus::Failed,
                        Some(e.to_string()),
                    )
                    .await;
                return Err(e.into());
            }
            cp
        }
    };

    let (tx, rx) = queue::bounded(state.config.queue_capacity);
    let emitter = Arc::new(Emitter::new(
        checkpoint.clone(),
        tx,
        Arc::clone(&state.checkpoint_store),
        registration.log.clone(),
        state.config.preview_chars,
    ));

    tracing::info!(
        thread_id = %req.thread_id,
        detached = req.detached,
        resumed,
        "thread started"
    );

    emitter.graph_start();
    if resumed {
        emitter.state_snapshot().await;
    }

    if checkpoint.completed {
        // Nothing left to run: replay the terminal state only.
        finalize(&emitter, &state.registry, registration.run_id, Ok(String::new())).await;
    } else {
        let keepalive = spawn_keepalive(Arc::clone(&emitter), state.config.keepalive_interval);
        let mut cancel = registration.cancel.clone();
        let ctx = RunContext::new(
            Arc::clone(&emitter),
            req.input,
            req.resume_from,
            StepCounter::starting_at(checkpoint.step, state.config.recursion_limit),
            state.rate_gates.clone(),
            state.config.max_rate_wait,
            registration.cancel,
        );
        let runner = Arc::clone(&state.runner);
        let registry = state.registry.clone();
        let run_id = registration.run_id;

        tokio::spawn(async move {
            let result = tokio::select! {
                r = runner.run(ctx) => r,
                _ = async {
                    // A dropped sender means the entry was replaced; keep running.
                    if cancel.wait_for(|stop| *stop).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                } => Err(StrandError::Cancelled),
            };
            keepalive.abort();
            finalize(&emitter, &registry, run_id, result).await;
        });
    }

    match job_id {
        Some(job_id) => {
            drop(rx);
            Ok(Launch::Detached(JobAccepted {
                job_id,
                thread_id: req.thread_id,
            }))
        }
        None => Ok(Launch::Attached(rx)),
    }
}

/// Close out a run: `graph_end` on success, otherwise a terminal error or a silent close.
async fn finalize(
    emitter: &Emitter,
    registry: &ThreadRegistry,
    run_id: u64,
    result: Result<String>,
) {
    let thread_id = emitter.thread_id();
    let result = match result {
        Ok(response) => emitter.graph_end(response).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            tracing::info!(thread_id, dropped = emitter.dropped(), "thread completed");
            registry
                .finish(thread_id, run_id, ThreadStatus::Completed, None)
                .await;
        }
        Err(StrandError::Cancelled) => {
            tracing::info!(thread_id, "thread stopped");
            emitter.close();
            registry
                .finish(thread_id, run_id, ThreadStatus::Stopped, None)
                .await;
        }
        Err(e) => {
            emitter.fail(&e);
            registry
                .finish(thread_id, run_id, ThreadStatus::Failed, Some(e.to_string()))
                .await;
        }
    }
}
