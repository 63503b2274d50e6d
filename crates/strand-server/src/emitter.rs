//! Per-thread event emission.
//!
//! The emitter stamps each event with the thread's next sequence number,
//! records a summary in the progress log, and pushes it to the live queue
//! without blocking. Node completion persists the checkpoint before the
//! `node_end`/`state_update` pair is emitted, so anything a client learns from
//! a `state_update` can be recovered through the load endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use strand_checkpoint::prelude::{Checkpoint, CheckpointStore};
use strand_core::error::{CheckpointError, Result, StrandError};
use strand_core::event::{EventKind, StatePayload, StreamEvent, TokenUsage, ToolCallRef};
use strand_core::preview::{preview, preview_value};

use crate::queue::{PushOutcome, QueueSender, QueuedEvent};
use crate::registry::ProgressLog;

/// What a completed node contributes to the thread's state.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub output: Option<Value>,
    /// Replaces the domain state when set.
    pub state: Option<Value>,
    pub messages_added: u64,
    /// Forwarded to clients as `report_state`.
    pub report_state: Option<Value>,
}

pub struct Emitter {
    thread_id: String,
    /// Held across numbering and enqueueing so the queue stays in `seq` order.
    seq: Mutex<u64>,
    sender: QueueSender,
    store: Arc<dyn CheckpointStore>,
    checkpoint: tokio::sync::Mutex<Checkpoint>,
    log: ProgressLog,
    preview_chars: usize,
    last_emit: Mutex<Instant>,
    failed: AtomicBool,
}

impl Emitter {
    pub fn new(
        checkpoint: Checkpoint,
        sender: QueueSender,
        store: Arc<dyn CheckpointStore>,
        log: ProgressLog,
        preview_chars: usize,
    ) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            seq: Mutex::new(0),
            sender,
            store,
            checkpoint: tokio::sync::Mutex::new(checkpoint),
            log,
            preview_chars,
            last_emit: Mutex::new(Instant::now()),
            failed: AtomicBool::new(false),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Emit one event. Returns what the live queue did with it.
    pub fn emit(&self, kind: EventKind) -> PushOutcome {
        if self.sender.is_closed() {
            return PushOutcome::Disconnected;
        }
        let event = StreamEvent::new(self.thread_id.clone(), kind);
        let (seq, outcome) = {
            let mut last = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
            *last += 1;
            let seq = *last;
            if !event.is_keepalive() {
                self.log.push(event.summary());
            }
            (seq, self.sender.push(QueuedEvent { seq, event }))
        };
        *self.last_emit.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();

        match outcome {
            PushOutcome::Evicted(class) => {
                tracing::debug!(thread_id = %self.thread_id, seq, ?class, "live queue full, evicted older event");
            }
            PushOutcome::Rejected => {
                tracing::debug!(thread_id = %self.thread_id, seq, "live queue full, event dropped");
            }
            PushOutcome::Queued | PushOutcome::Disconnected => {}
        }
        outcome
    }

    /// Sequence number of the last emitted event.
    pub fn last_seq(&self) -> u64 {
        *self.seq.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the last emitted event, keepalives included.
    pub fn idle_for(&self) -> Duration {
        self.last_emit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn last_emit(&self) -> Instant {
        *self.last_emit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Events the live queue shed for this thread.
    pub fn dropped(&self) -> u64 {
        self.sender.dropped()
    }

    pub async fn checkpoint(&self) -> Checkpoint {
        self.checkpoint.lock().await.clone()
    }

    pub fn graph_start(&self) {
        self.emit(EventKind::GraphStart);
    }

    /// Emit the checkpoint's full graph position as a `state_snapshot`.
    pub async fn state_snapshot(&self) {
        let cp = self.checkpoint.lock().await;
        let payload = StatePayload {
            next: cp.next.clone(),
            visited_nodes: cp.visited_nodes.clone(),
            message_count: cp.message_count,
            report_state: (!cp.state.is_null()).then(|| cp.state.clone()),
        };
        drop(cp);
        self.emit(EventKind::StateSnapshot(payload));
    }

    pub fn keepalive(&self) {
        self.emit(EventKind::Keepalive);
    }

    pub fn content_chunk(&self, content: impl Into<String>) {
        self.emit(EventKind::ContentChunk {
            content: content.into(),
        });
    }

    /// Persist the nodes about to run and announce them.
    pub async fn schedule(&self, next: Vec<String>) -> Result<()> {
        let mut cp = self.checkpoint.lock().await;
        cp.next = next.clone();
        self.persist(&cp).await?;
        let message_count = cp.message_count;
        drop(cp);

        self.emit(EventKind::StateUpdate(StatePayload {
            next,
            visited_nodes: Vec::new(),
            message_count,
            report_state: None,
        }));
        Ok(())
    }

    pub fn node_start(&self, node: &str, input: Option<&Value>) {
        self.emit(EventKind::NodeStart {
            node: node.to_string(),
            input_preview: input.map(|v| preview_value(v, self.preview_chars)),
        });
    }

    /// Record a node's completion: checkpoint first, then `node_end` and `state_update`.
    pub async fn node_end(&self, node: &str, update: NodeUpdate) -> Result<()> {
        let mut cp = self.checkpoint.lock().await;
        cp.record_node(node);
        cp.message_count += update.messages_added;
        if let Some(state) = update.state {
            cp.state = state;
        }
        self.persist(&cp).await?;
        let message_count = cp.message_count;
        drop(cp);

        self.emit(EventKind::NodeEnd {
            node: node.to_string(),
            output_preview: update
                .output
                .as_ref()
                .map(|v| preview_value(v, self.preview_chars)),
        });
        self.emit(EventKind::StateUpdate(StatePayload {
            next: Vec::new(),
            visited_nodes: vec![node.to_string()],
            message_count,
            report_state: update.report_state,
        }));
        Ok(())
    }

    pub fn llm_start(&self, model: &str, run_id: Option<&str>, input: Option<&str>) {
        self.emit(EventKind::LlmStart {
            model: model.to_string(),
            run_id: run_id.map(String::from),
            input_preview: input.map(|s| preview(s, self.preview_chars)),
        });
    }

    pub fn llm_end(
        &self,
        model: &str,
        run_id: Option<&str>,
        output: Option<&str>,
        token_usage: Option<TokenUsage>,
        tool_calls: &[&str],
    ) {
        self.emit(EventKind::LlmEnd {
            model: model.to_string(),
            run_id: run_id.map(String::from),
            output_preview: output.map(|s| preview(s, self.preview_chars)),
            token_usage,
            tool_calls: tool_calls
                .iter()
                .map(|name| ToolCallRef {
                    name: name.to_string(),
                })
                .collect(),
        });
    }

    pub fn tool_start(&self, tool_name: &str, args: Option<&Value>) {
        self.emit(EventKind::ToolStart {
            tool_name: tool_name.to_string(),
            args_preview: args.map(|v| preview_value(v, self.preview_chars)),
        });
    }

    pub fn tool_end(&self, tool_name: &str, result: Option<&Value>) {
        self.emit(EventKind::ToolEnd {
            tool_name: tool_name.to_string(),
            result_preview: result.map(|v| preview_value(v, self.preview_chars)),
        });
    }

    /// Mark the checkpoint completed, emit `graph_end` and close the stream.
    pub async fn graph_end(&self, response: impl Into<String>) -> Result<()> {
        let mut cp = self.checkpoint.lock().await;
        cp.mark_completed();
        self.persist(&cp).await?;
        drop(cp);

        self.emit(EventKind::GraphEnd {
            response: response.into(),
        });
        self.close();
        Ok(())
    }

    /// Emit a terminal `error` event and close the stream.
    pub fn fail(&self, err: &StrandError) {
        if self.failed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!(thread_id = %self.thread_id, error_type = err.error_type(), error = %err, "thread failed");
        self.emit(EventKind::Error {
            error: err.to_string(),
            error_type: err.error_type().to_string(),
        });
        self.close();
    }

    /// Close the live stream without a terminal event.
    pub fn close(&self) {
        self.sender.close();
    }

    async fn persist(&self, cp: &Checkpoint) -> Result<()> {
        if let Err(e) = self.store.put(cp.clone()).await {
            tracing::error!(thread_id = %self.thread_id, error = %e, "checkpoint write failed");
            let err = match e {
                StrandError::Checkpoint(_) => e,
                other => CheckpointError::Storage(other.to_string()).into(),
            };
            self.fail(&err);
            return Err(err);
        }
        Ok(())
    }
}
