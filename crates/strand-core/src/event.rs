use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event of a thread's ordered event sequence, in its flat form.
///
/// `thread_id` is common to every event; the variant-specific fields live in
/// [`EventKind`], discriminated on the wire by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub thread_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Begins a thread.
    GraphStart,
    /// Incremental text; fragments concatenate in arrival order.
    ContentChunk { content: String },
    NodeStart {
        node: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_preview: Option<String>,
    },
    NodeEnd {
        node: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_preview: Option<String>,
    },
    LlmStart {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_preview: Option<String>,
    },
    LlmEnd {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_preview: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_usage: Option<TokenUsage>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRef>,
    },
    ToolStart {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args_preview: Option<String>,
    },
    ToolEnd {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_preview: Option<String>,
    },
    /// Incremental authority update.
    StateUpdate(StatePayload),
    /// Checkpoint-derived override, sent after a resume.
    StateSnapshot(StatePayload),
    GraphEnd {
        #[serde(default)]
        response: String,
    },
    Keepalive,
    Error { error: String, error_type: String },
}

/// Payload shared by `state_update` and `state_snapshot`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    /// Nodes about to execute; empty means none pending.
    #[serde(default)]
    pub next: Vec<String>,
    /// Nodes newly confirmed visited since the previous update.
    #[serde(default)]
    pub visited_nodes: Vec<String>,
    #[serde(default)]
    pub message_count: u64,
    /// Domain sub-object, forwarded untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_state: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub name: String,
}

/// Routing category of an event, carried as `flow` in the envelope shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Graph, node and state transitions.
    Lifecycle,
    /// Model, tool and text activity inside a node.
    Activity,
    /// Liveness traffic.
    Control,
}

/// Delivery value of an event, lowest first. A full queue sheds the lowest class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventClass {
    Keepalive,
    Activity,
    NodeLifecycle,
    Authority,
}

impl EventKind {
    /// The wire discriminant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GraphStart => "graph_start",
            Self::ContentChunk { .. } => "content_chunk",
            Self::NodeStart { .. } => "node_start",
            Self::NodeEnd { .. } => "node_end",
            Self::LlmStart { .. } => "llm_start",
            Self::LlmEnd { .. } => "llm_end",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::StateUpdate(_) => "state_update",
            Self::StateSnapshot(_) => "state_snapshot",
            Self::GraphEnd { .. } => "graph_end",
            Self::Keepalive => "keepalive",
            Self::Error { .. } => "error",
        }
    }

    pub fn flow(&self) -> Flow {
        match self.class() {
            EventClass::Keepalive => Flow::Control,
            EventClass::Activity => Flow::Activity,
            EventClass::NodeLifecycle | EventClass::Authority => Flow::Lifecycle,
        }
    }

    pub fn class(&self) -> EventClass {
        match self {
            Self::Keepalive => EventClass::Keepalive,
            Self::ContentChunk { .. }
            | Self::LlmStart { .. }
            | Self::LlmEnd { .. }
            | Self::ToolStart { .. }
            | Self::ToolEnd { .. } => EventClass::Activity,
            Self::NodeStart { .. } | Self::NodeEnd { .. } => EventClass::NodeLifecycle,
            Self::GraphStart
            | Self::StateUpdate(_)
            | Self::StateSnapshot(_)
            | Self::GraphEnd { .. }
            | Self::Error { .. } => EventClass::Authority,
        }
    }

    /// `graph_end` and `error` end a thread's event sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GraphEnd { .. } | Self::Error { .. })
    }
}

impl StreamEvent {
    pub fn new(thread_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_keepalive(&self) -> bool {
        matches!(self.kind, EventKind::Keepalive)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// A one-line human summary, used for progress logs.
    pub fn summary(&self) -> String {
        match &self.kind {
            EventKind::GraphStart => "graph started".into(),
            EventKind::ContentChunk { content } => format!("+{} chars", content.chars().count()),
            EventKind::NodeStart { node, .. } => format!("node '{node}' started"),
            EventKind::NodeEnd { node, .. } => format!("node '{node}' finished"),
            EventKind::LlmStart { model, .. } => format!("model '{model}' called"),
            EventKind::LlmEnd { model, tool_calls, .. } if tool_calls.is_empty() => {
                format!("model '{model}' returned")
            }
            EventKind::LlmEnd { model, tool_calls, .. } => {
                format!("model '{model}' requested {} tool call(s)", tool_calls.len())
            }
            EventKind::ToolStart { tool_name, .. } => format!("tool '{tool_name}' started"),
            EventKind::ToolEnd { tool_name, .. } => format!("tool '{tool_name}' finished"),
            EventKind::StateUpdate(p) | EventKind::StateSnapshot(p) => {
                format!("state: next={:?} messages={}", p.next, p.message_count)
            }
            EventKind::GraphEnd { .. } => "graph finished".into(),
            EventKind::Keepalive => "keepalive".into(),
            EventKind::Error { error, error_type } => format!("error ({error_type}): {error}"),
        }
    }
}
