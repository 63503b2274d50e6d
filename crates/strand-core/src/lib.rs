pub mod envelope;
pub mod error;
pub mod event;
pub mod preview;
pub mod protocol;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::envelope::{Envelope, Frame, WireFormat};
    pub use crate::error::{
        error_types, CheckpointError, GuardError, Result, StrandError, StreamError,
    };
    pub use crate::event::{
        EventClass, EventKind, Flow, StatePayload, StreamEvent, TokenUsage, ToolCallRef,
    };
    pub use crate::protocol::{
        GraphStateView, JobAccepted, LoadResponse, Progress, StartRequest, StatusResponse,
        StopAck, ThreadStatus,
    };
}
