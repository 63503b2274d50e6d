//! Client-side execution state.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use strand_core::event::{EventKind, StreamEvent};
use strand_core::protocol::ThreadStatus;

/// Lifecycle of a thread as the client sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl From<ThreadStatus> for ExecutionStatus {
    fn from(status: ThreadStatus) -> Self {
        match status {
            ThreadStatus::Running => Self::Running,
            ThreadStatus::Completed => Self::Completed,
            ThreadStatus::Stopped => Self::Stopped,
            ThreadStatus::Failed => Self::Failed,
            ThreadStatus::NotFound => Self::Idle,
        }
    }
}

/// Everything the client has reconciled about one thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionState {
    pub thread_id: Option<String>,
    pub next: Vec<String>,
    /// Cumulative; only ever grows within a thread.
    pub visited: BTreeSet<String>,
    pub active_node: Option<String>,
    pub message_count: u64,
    /// Rolling activity log. Lossy; never used for resume decisions.
    pub stream_events: VecDeque<StreamEvent>,
    pub streamed_text: String,
    pub response: Option<String>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub report_state: Option<Value>,
    /// Domain state from a checkpoint or status poll.
    pub domain_state: Value,
    pub progress: Vec<String>,
    pub(crate) finished_at: Option<Instant>,
}

/// LLM and tool activity observed while one node was active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeActivity {
    pub node: String,
    pub llm_calls: Vec<String>,
    pub tool_calls: Vec<String>,
}

impl ExecutionState {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Default::default()
        }
    }

    /// Final text: the `graph_end` response when non-empty, else the streamed chunks.
    pub fn output(&self) -> &str {
        match self.response.as_deref() {
            Some(r) if !r.is_empty() => r,
            _ => &self.streamed_text,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Group model and tool calls under the node that was active when they started.
    pub fn node_activity(&self) -> Vec<NodeActivity> {
        let mut out: Vec<NodeActivity> = Vec::new();
        let mut current: Option<usize> = None;

        for event in &self.stream_events {
            match &event.kind {
                EventKind::NodeStart { node, .. } => {
                    let idx = match out.iter().position(|a| &a.node == node) {
                        Some(i) => i,
                        None => {
                            out.push(NodeActivity {
                                node: node.clone(),
                                ..Default::default()
                            });
                            out.len() - 1
                        }
                    };
                    current = Some(idx);
                }
                EventKind::NodeEnd { .. } => current = None,
                EventKind::LlmStart { model, .. } => {
                    if let Some(i) = current {
                        out[i].llm_calls.push(model.clone());
                    }
                }
                EventKind::ToolStart { tool_name, .. } => {
                    if let Some(i) = current {
                        out[i].tool_calls.push(tool_name.clone());
                    }
                }
                _ => {}
            }
        }
        out
    }
}
