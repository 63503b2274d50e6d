use async_trait::async_trait;

use strand_core::error::Result;

use crate::types::Checkpoint;

/// Durable key-value storage for the last known state of each thread.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store the checkpoint for `checkpoint.thread_id`, replacing any previous one.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Retrieve the checkpoint for a thread, if one was ever written.
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Remove the checkpoint for a thread. Removing a missing thread is not an error.
    async fn delete(&self, thread_id: &str) -> Result<()>;
}
