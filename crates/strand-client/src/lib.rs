pub mod client;
pub mod config;
pub mod controller;
pub mod frame;
pub mod poll;
pub mod reader;
pub mod reconciler;
pub mod resume;
pub mod session;
pub mod state;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{ApiClient, StartResponse};
    pub use crate::config::ClientConfig;
    pub use crate::controller::{Outcome, ThreadController};
    pub use crate::frame::{LineDecoder, parse_line};
    pub use crate::poll::{PollCoordinator, PollOutcome};
    pub use crate::reader::{ByteStream, StreamReader, byte_stream};
    pub use crate::reconciler::{Effect, Reconciler, ReconcilerState, reduce};
    pub use crate::resume::{Attachment, CheckpointSource, ResumeCoordinator, StatusSource};
    pub use crate::session::{AttemptOutcome, drive};
    pub use crate::state::{ExecutionState, ExecutionStatus, NodeActivity};
}
