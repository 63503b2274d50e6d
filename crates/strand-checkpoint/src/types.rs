use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use strand_core::protocol::{GraphStateView, LoadResponse};

/// Authoritative snapshot of where a thread's graph stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Nodes about to execute.
    pub next: Vec<String>,
    /// Every node that has completed, in first-completion order, without repeats.
    pub visited_nodes: Vec<String>,
    pub message_count: u64,
    /// Opaque domain state.
    pub state: Value,
    /// Number of node completions recorded.
    pub step: usize,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            next: Vec::new(),
            visited_nodes: Vec::new(),
            message_count: 0,
            state: Value::Null,
            step: 0,
            completed: false,
            updated_at: Utc::now(),
        }
    }

    /// Record that `node` completed: it joins `visited_nodes` and nothing is pending.
    pub fn record_node(&mut self, node: &str) {
        if !self.visited_nodes.iter().any(|n| n == node) {
            self.visited_nodes.push(node.to_string());
        }
        self.next.clear();
        self.step += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.next.clear();
        self.updated_at = Utc::now();
    }

    pub fn graph_state(&self) -> GraphStateView {
        GraphStateView {
            next: self.next.clone(),
            visited_nodes: self.visited_nodes.clone(),
            message_count: self.message_count,
        }
    }

    pub fn to_load_response(&self) -> LoadResponse {
        LoadResponse {
            thread_id: self.thread_id.clone(),
            graph_state: self.graph_state(),
            state: self.state.clone(),
            completed: self.completed,
        }
    }
}
