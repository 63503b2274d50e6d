//! Execution guards: per-model call spacing and the per-thread step budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use strand_core::error::GuardError;

use crate::config::ServerConfig;

/// Serializes calls to one model and spaces their starts by a fixed floor.
#[derive(Debug)]
pub struct RateGate {
    model: String,
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(model: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            model: model.into(),
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    /// Wait until a call may start, however long that takes.
    pub async fn acquire(&self) {
        let mut last = self.last_start.lock().await;
        if let Some(ready) = last.map(|t| t + self.min_interval) {
            tokio::time::sleep_until(ready).await;
        }
        *last = Some(Instant::now());
    }

    /// Like [`acquire`](Self::acquire), but fails instead of waiting longer than `max_wait`.
    pub async fn acquire_within(&self, max_wait: Duration) -> Result<(), GuardError> {
        let mut last = self.last_start.lock().await;
        let now = Instant::now();
        if let Some(ready) = last.map(|t| t + self.min_interval) {
            let wait = ready.saturating_duration_since(now);
            if wait > max_wait {
                tracing::warn!(model = %self.model, wait_ms = wait.as_millis() as u64, "rate gate wait exceeds limit");
                return Err(GuardError::RateLimited {
                    model: self.model.clone(),
                    wait_ms: wait.as_millis() as u64,
                });
            }
            if !wait.is_zero() {
                tracing::debug!(model = %self.model, wait_ms = wait.as_millis() as u64, "waiting on rate gate");
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

/// Rate gates keyed by model name, shared by every thread on the server.
#[derive(Debug, Clone, Default)]
pub struct RateGates {
    gates: Arc<HashMap<String, Arc<RateGate>>>,
}

impl RateGates {
    pub fn new(models: &[String], min_interval: Duration) -> Self {
        if min_interval.is_zero() {
            return Self::default();
        }
        let gates = models
            .iter()
            .map(|m| (m.clone(), Arc::new(RateGate::new(m.clone(), min_interval))))
            .collect();
        Self {
            gates: Arc::new(gates),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.rate_limited_models, config.min_call_interval)
    }

    /// `None` for models that are not rate limited.
    pub fn gate_for(&self, model: &str) -> Option<Arc<RateGate>> {
        self.gates.get(model).cloned()
    }
}

/// Counts node transitions of one thread against the recursion limit.
#[derive(Debug)]
pub struct StepCounter {
    steps: AtomicUsize,
    limit: usize,
}

impl StepCounter {
    pub fn new(limit: usize) -> Self {
        Self::starting_at(0, limit)
    }

    /// Continue counting from a resumed thread's recorded steps.
    pub fn starting_at(steps: usize, limit: usize) -> Self {
        Self {
            steps: AtomicUsize::new(steps),
            limit,
        }
    }

    /// Count one transition; fails once the limit is exceeded.
    pub fn tick(&self) -> Result<usize, GuardError> {
        let n = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.limit {
            return Err(GuardError::RecursionLimit { limit: self.limit });
        }
        Ok(n)
    }

    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }
}
