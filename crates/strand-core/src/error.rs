use std::time::Duration;

use thiserror::Error;

/// Wire values carried in the `error_type` field of an `error` event.
pub mod error_types {
    pub const CHECKPOINT_FAILURE: &str = "checkpoint_failure";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const RECURSION_LIMIT: &str = "recursion_limit";
    pub const NODE_FAILURE: &str = "node_failure";
    pub const CANCELLED: &str = "cancelled";
    pub const INTERNAL: &str = "internal";
}

/// Top-level error type for Strand.
#[derive(Debug, Error)]
pub enum StrandError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Guard error: {0}")]
    Guard(#[from] GuardError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Node error in '{node}': {message}")]
    Node { node: String, message: String },

    #[error("Thread cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Failures of a single streaming attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("No data received for {}s", .idle.as_secs())]
    InactivityTimeout { idle: Duration },

    #[error("Stream exceeded {}s", .elapsed.as_secs())]
    AbsoluteTimeout { elapsed: Duration },

    /// A terminal `error` event asserted by the server.
    #[error("{error_type}: {error}")]
    Server { error: String, error_type: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Thread not found: {0}")]
    NotFound(String),
}

impl StreamError {
    /// Returns `true` for either client-side timer firing.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::InactivityTimeout { .. } | Self::AbsoluteTimeout { .. }
        )
    }

    /// Returns `true` for connection-level failures that a resume can recover from.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    #[error("Rate limited on '{model}': next call allowed in {wait_ms}ms")]
    RateLimited { model: String, wait_ms: u64 },

    #[error("Recursion limit ({limit}) exceeded")]
    RecursionLimit { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckpointError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl StrandError {
    /// Classify this error for the `error_type` field of an `error` event.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Checkpoint(_) => error_types::CHECKPOINT_FAILURE,
            Self::Guard(GuardError::RateLimited { .. }) => error_types::RATE_LIMIT,
            Self::Guard(GuardError::RecursionLimit { .. }) => error_types::RECURSION_LIMIT,
            Self::Node { .. } => error_types::NODE_FAILURE,
            Self::Cancelled => error_types::CANCELLED,
            Self::Stream(_) | Self::Serialization(_) | Self::Other(_) => error_types::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, StrandError>;
