use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use strand_core::error::Result;

use crate::store::CheckpointStore;
use crate::types::Checkpoint;

/// Checkpoints kept in process memory; the server default when no database is configured.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(thread_id).cloned())
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.remove(thread_id);
        Ok(())
    }
}
