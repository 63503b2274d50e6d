use std::sync::Arc;

use strand_checkpoint::prelude::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use strand_core::error::Result;

use crate::config::ServerConfig;
use crate::guard::RateGates;
use crate::registry::ThreadRegistry;
use crate::runner::{GraphRunner, ScriptedRunner};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: ThreadRegistry,
    pub checkpoint_store: Arc<dyn CheckpointStore>,
    pub runner: Arc<dyn GraphRunner>,
    pub rate_gates: RateGates,
}

impl AppState {
    /// In-memory checkpoints and the scripted runner.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(ScriptedRunner::default()),
        )
    }

    /// Pick the checkpoint backend from `config.checkpoint_db`.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let store: Arc<dyn CheckpointStore> = match &config.checkpoint_db {
            Some(path) => Arc::new(SqliteCheckpointStore::new(path)?),
            None => Arc::new(MemoryCheckpointStore::new()),
        };
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(ScriptedRunner::default()),
        ))
    }

    pub fn with_parts(
        config: ServerConfig,
        checkpoint_store: Arc<dyn CheckpointStore>,
        runner: Arc<dyn GraphRunner>,
    ) -> Self {
        Self {
            registry: ThreadRegistry::new(config.recent_log_limit),
            rate_gates: RateGates::from_config(&config),
            config: Arc::new(config),
            checkpoint_store,
            runner,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn GraphRunner>) -> Self {
        self.runner = runner;
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
