//! Rehydrating a thread from its checkpoint.

use std::sync::Arc;

use async_trait::async_trait;

use strand_core::error::StreamError;
use strand_core::protocol::{LoadResponse, StatusResponse, ThreadStatus};

use crate::reconciler::Reconciler;
use crate::state::ExecutionStatus;

/// Where checkpoints come from. `Ok(None)` means the thread has none.
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<LoadResponse>, StreamError>;
}

/// Point-in-time thread status.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self, thread_id: &str) -> Result<StatusResponse, StreamError>;
}

/// What a thread looked like when the client attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// No checkpoint: nothing has run under this id yet.
    Fresh,
    /// Still executing server-side; follow it by polling.
    Running,
    /// Nothing more will happen without a resume.
    Finished(ExecutionStatus),
}

pub struct ResumeCoordinator {
    checkpoints: Arc<dyn CheckpointSource>,
    statuses: Arc<dyn StatusSource>,
}

impl ResumeCoordinator {
    pub fn new(checkpoints: Arc<dyn CheckpointSource>, statuses: Arc<dyn StatusSource>) -> Self {
        Self {
            checkpoints,
            statuses,
        }
    }

    /// Seed `reconciler` from the checkpoint alone, without any event replay.
    ///
    /// Returns `false` when no checkpoint exists; the state is then reset to an
    /// empty thread under `thread_id`. A completed checkpoint is pinned as a report.
    pub async fn rehydrate(
        &self,
        thread_id: &str,
        reconciler: &mut Reconciler,
    ) -> Result<bool, StreamError> {
        match self.checkpoints.load(thread_id).await? {
            Some(load) => {
                tracing::debug!(thread_id, completed = load.completed, "rehydrating from checkpoint");
                reconciler.seed(&load);
                if load.completed {
                    reconciler.pin_report();
                }
                Ok(true)
            }
            None => {
                reconciler.begin(Some(thread_id.to_string()));
                Ok(false)
            }
        }
    }

    /// Rehydrate, then ask the server whether the thread is still running.
    pub async fn attach(
        &self,
        thread_id: &str,
        reconciler: &mut Reconciler,
    ) -> Result<Attachment, StreamError> {
        let found = self.rehydrate(thread_id, reconciler).await?;
        if reconciler.state().status == ExecutionStatus::Completed {
            return Ok(Attachment::Finished(ExecutionStatus::Completed));
        }

        let status = self.statuses.status(thread_id).await?;
        if status.status == ThreadStatus::NotFound {
            if !found {
                return Ok(Attachment::Fresh);
            }
            // A checkpoint with no live execution behind it, e.g. after a server restart.
            reconciler.mark_stopped();
            return Ok(Attachment::Finished(ExecutionStatus::Stopped));
        }
        reconciler.merge_status(&status);

        Ok(match reconciler.state().status {
            ExecutionStatus::Running => Attachment::Running,
            other => {
                if other == ExecutionStatus::Stopped {
                    reconciler.pin_report();
                }
                Attachment::Finished(other)
            }
        })
    }
}
