//! Request and response bodies of the thread HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-side lifecycle status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Running,
    Completed,
    NotFound,
    Stopped,
    Failed,
}

impl ThreadStatus {
    /// Polling ends on these statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NotFound)
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::NotFound => write!(f, "not_found"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Graph position as recorded by the checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStateView {
    #[serde(default)]
    pub next: Vec<String>,
    #[serde(default)]
    pub visited_nodes: Vec<String>,
    #[serde(default)]
    pub message_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub recent_logs: Vec<String>,
}

/// Body of `GET /status/{thread_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ThreadStatus,
    #[serde(default)]
    pub graph_state: GraphStateView,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn not_found() -> Self {
        Self {
            status: ThreadStatus::NotFound,
            graph_state: GraphStateView::default(),
            state: Value::Null,
            progress: Progress::default(),
            error: None,
        }
    }
}

/// Body of `GET /load/{thread_id}` and `GET /state?thread_id=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResponse {
    pub thread_id: String,
    pub graph_state: GraphStateView,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub completed: bool,
}

/// Body of `POST /threads`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub input: Value,
    /// Run as a background job and answer with [`JobAccepted`] instead of a stream.
    #[serde(default)]
    pub detached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub thread_id: String,
}

/// Body of `POST /stop/{thread_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAck {
    pub thread_id: String,
    /// `false` when nothing was running to cancel.
    pub stopped: bool,
    pub status: ThreadStatus,
}
