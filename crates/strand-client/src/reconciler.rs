//! Folds a thread's event sequence into an [`ExecutionState`].
//!
//! [`ReconcilerState`] is the pure part: every field the reducer needs lives
//! in it, and [`reduce`] threads it through one frame at a time. [`Reconciler`]
//! wraps it with the side effects a caller wants: publishing each new state to
//! subscribers, forwarding `report_state` to a domain hook, and clearing a
//! finished live state after a grace period.
//!
//! # Dedup
//!
//! Each frame gets an identity: a SHA-256 over its type, thread, content and
//! position. Position is the envelope `seq` when present. Legacy frames carry
//! no `seq`, so their position is a cursor counting the `node_start` and
//! `node_end` frames accepted so far. A legacy duplicate is caught while it
//! lands before the next node boundary. A boundary frame is also checked
//! against the position before it, since it is the one frame that moved the
//! cursor. Two identical boundaries in a row never occur in a real run.
//!
//! A legacy `graph_start` rewinds the cursor, so a log replayed from its first
//! frame lines up with the identities it produced the first time. A legacy
//! loop and a replay of it look the same from the wire; only a replay that
//! restarts at `graph_start` is recognised.
//!
//! The seen-set lives for one stream attempt. The server numbers every run
//! from 1, resumes included, so identities from a previous attempt say nothing
//! about the next one. Call [`Reconciler::begin_attempt`] before each stream.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::Instant;

use strand_core::envelope::Frame;
use strand_core::error::StreamError;
use strand_core::event::{EventKind, StatePayload, StreamEvent};
use strand_core::protocol::{LoadResponse, StatusResponse, ThreadStatus};

use crate::config::ClientConfig;
use crate::state::{ExecutionState, ExecutionStatus};

/// Something a caller may want to react to after a frame is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StateChanged,
    /// A `content_chunk` fragment.
    Text(String),
    /// Opaque domain state carried by a state update.
    ReportState(Value),
    Finished { response: String },
    Failed(StreamError),
}

type Identity = [u8; 32];

#[derive(Debug, Clone, Default)]
pub struct ReconcilerState {
    pub execution: ExecutionState,
    seen: HashSet<Identity>,
    /// Nodes whose `node_end` arrived and that have not started again.
    ended: BTreeSet<String>,
    /// Position of the next legacy frame.
    cursor: u64,
    /// Event log cap; zero keeps everything.
    max_events: usize,
}

/// Apply one frame to `state`, returning the new state and its effects.
pub fn reduce(mut state: ReconcilerState, frame: &Frame) -> (ReconcilerState, Vec<Effect>) {
    let effects = state.apply(frame);
    (state, effects)
}

impl ReconcilerState {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            ..Default::default()
        }
    }

    /// Start over for `thread_id`; `None` waits to adopt the id of the first event.
    pub fn reset(&mut self, thread_id: Option<String>) {
        *self = Self {
            execution: ExecutionState {
                thread_id,
                ..Default::default()
            },
            max_events: self.max_events,
            ..Default::default()
        };
    }

    /// Forget frame identities, keeping the reconciled state.
    pub fn clear_seen(&mut self) {
        self.seen.clear();
        self.cursor = 0;
    }

    pub fn apply(&mut self, frame: &Frame) -> Vec<Effect> {
        let event = &frame.event;
        if event.is_keepalive() {
            return Vec::new();
        }

        self.route(event);

        if !self.admit(frame) {
            tracing::trace!(event_type = event.type_name(), seq = ?frame.seq, "duplicate frame ignored");
            return Vec::new();
        }
        self.record(event);

        let mut effects = Vec::new();
        match &event.kind {
            EventKind::GraphStart => {
                let exec = &mut self.execution;
                exec.status = ExecutionStatus::Running;
                exec.error = None;
                exec.finished_at = None;
                self.ended.clear();
                effects.push(Effect::StateChanged);
            }
            EventKind::ContentChunk { content } => {
                self.execution.streamed_text.push_str(content);
                effects.push(Effect::Text(content.clone()));
            }
            EventKind::NodeStart { node, .. } => {
                self.ended.remove(node);
                let exec = &mut self.execution;
                exec.visited.insert(node.clone());
                exec.active_node = Some(node.clone());
                exec.next = vec![node.clone()];
                self.mark_live();
                effects.push(Effect::StateChanged);
            }
            EventKind::NodeEnd { node, .. } => {
                self.ended.insert(node.clone());
                let exec = &mut self.execution;
                exec.visited.insert(node.clone());
                exec.active_node = None;
                exec.next.retain(|n| n != node);
                effects.push(Effect::StateChanged);
            }
            EventKind::StateUpdate(payload) => {
                self.merge(payload, true);
                effects.extend(Self::report(payload));
                effects.push(Effect::StateChanged);
            }
            EventKind::StateSnapshot(payload) => {
                self.ended.clear();
                self.merge(payload, false);
                effects.extend(Self::report(payload));
                effects.push(Effect::StateChanged);
            }
            EventKind::LlmStart { .. }
            | EventKind::LlmEnd { .. }
            | EventKind::ToolStart { .. }
            | EventKind::ToolEnd { .. } => {
                let exec = &mut self.execution;
                exec.next = exec.active_node.iter().cloned().collect();
                effects.push(Effect::StateChanged);
            }
            EventKind::GraphEnd { response } => {
                self.complete(Some(response.as_str()));
                effects.push(Effect::StateChanged);
                effects.push(Effect::Finished {
                    response: self.execution.output().to_string(),
                });
            }
            EventKind::Error { error, error_type } => {
                let exec = &mut self.execution;
                exec.status = ExecutionStatus::Failed;
                exec.error = Some(error.clone());
                effects.push(Effect::StateChanged);
                effects.push(Effect::Failed(StreamError::Server {
                    error: error.clone(),
                    error_type: error_type.clone(),
                }));
            }
            EventKind::Keepalive => {}
        }
        effects
    }

    /// Seed from a checkpoint without replaying any events.
    pub fn seed(&mut self, load: &LoadResponse) {
        if self.execution.thread_id.as_deref() != Some(load.thread_id.as_str()) {
            self.reset(Some(load.thread_id.clone()));
        }
        self.ended.clear();
        let exec = &mut self.execution;
        exec.next = load.graph_state.next.clone();
        exec.visited.extend(load.graph_state.visited_nodes.iter().cloned());
        exec.active_node = None;
        exec.message_count = load.graph_state.message_count;
        exec.domain_state = load.state.clone();
        if load.completed {
            exec.next.clear();
            exec.status = ExecutionStatus::Completed;
        }
    }

    /// Merge a status poll. A local `stopped` is never regressed to `running`.
    pub fn merge_status(&mut self, resp: &StatusResponse) {
        if resp.status == ThreadStatus::NotFound {
            return;
        }
        let exec = &mut self.execution;
        exec.visited.extend(resp.graph_state.visited_nodes.iter().cloned());
        exec.next = resp.graph_state.next.clone();
        exec.message_count = resp.graph_state.message_count;
        if !resp.state.is_null() {
            exec.domain_state = resp.state.clone();
        }
        exec.progress = resp.progress.recent_logs.clone();

        let incoming = ExecutionStatus::from(resp.status);
        if exec.status == ExecutionStatus::Stopped && incoming == ExecutionStatus::Running {
            tracing::debug!("ignoring running status after local stop");
        } else {
            exec.status = incoming;
        }
        if incoming == ExecutionStatus::Failed {
            exec.error = resp.error.clone();
        }
        exec.active_node = match exec.status {
            ExecutionStatus::Running => exec.next.first().cloned(),
            _ => None,
        };
    }

    /// Finish the thread locally: close a dangling active node and mark completed.
    pub fn complete(&mut self, response: Option<&str>) {
        let exec = &mut self.execution;
        if let Some(active) = exec.active_node.take() {
            exec.visited.insert(active);
        }
        exec.next.clear();
        if let Some(response) = response {
            if !response.is_empty() {
                exec.streamed_text = response.to_string();
            }
            exec.response = Some(response.to_string());
        }
        exec.status = ExecutionStatus::Completed;
    }

    fn route(&mut self, event: &StreamEvent) {
        let incoming = event.thread_id.as_str();
        if incoming.is_empty() {
            return;
        }
        match self.execution.thread_id.as_deref() {
            None => {
                if matches!(event.kind, EventKind::GraphStart) {
                    self.reset(Some(incoming.to_string()));
                } else {
                    self.execution.thread_id = Some(incoming.to_string());
                }
            }
            Some(current) if current != incoming => {
                tracing::info!(from = current, to = incoming, "thread changed, resetting state");
                self.reset(Some(incoming.to_string()));
            }
            Some(_) => {}
        }
    }

    fn merge(&mut self, payload: &StatePayload, drop_ended: bool) {
        let mut next = payload.next.clone();
        if drop_ended {
            next.retain(|n| !self.ended.contains(n));
        }

        let exec = &mut self.execution;
        let still_listed = exec.active_node.as_ref().is_none_or(|prev| next.contains(prev));
        if still_listed {
            exec.active_node = next.first().cloned();
            exec.next = next;
        } else {
            // The node already left `next`; its own end signal wins over this update.
            exec.active_node = None;
            exec.next.clear();
        }
        exec.visited.extend(payload.visited_nodes.iter().cloned());
        exec.message_count = payload.message_count;
        self.mark_live();
    }

    fn report(payload: &StatePayload) -> Option<Effect> {
        payload.report_state.clone().map(Effect::ReportState)
    }

    fn mark_live(&mut self) {
        if self.execution.status == ExecutionStatus::Idle {
            self.execution.status = ExecutionStatus::Running;
        }
    }

    fn record(&mut self, event: &StreamEvent) {
        let log = &mut self.execution.stream_events;
        if self.max_events > 0 {
            while log.len() >= self.max_events {
                log.pop_front();
            }
        }
        log.push_back(event.clone());
    }

    /// Record `frame`'s identity; false when it was already seen.
    fn admit(&mut self, frame: &Frame) -> bool {
        if frame.seq.is_some() {
            let id = self.identity(frame, 0);
            return self.seen.insert(id);
        }

        let boundary = matches!(
            frame.event.kind,
            EventKind::NodeStart { .. } | EventKind::NodeEnd { .. }
        );
        if matches!(frame.event.kind, EventKind::GraphStart) {
            self.cursor = 0;
        }

        let here = self.identity(frame, self.cursor);
        if self.seen.contains(&here) {
            // Replayed from the top: step over the frame it matched.
            if boundary {
                self.cursor += 1;
            }
            return false;
        }
        if boundary && self.cursor > 0 {
            let previous = self.identity(frame, self.cursor - 1);
            if self.seen.contains(&previous) {
                return false;
            }
        }

        self.seen.insert(here);
        if boundary {
            self.cursor += 1;
        }
        true
    }

    /// `position` stands in for the missing `seq` of a legacy frame.
    fn identity(&self, frame: &Frame, position: u64) -> Identity {
        let mut hasher = Sha256::new();
        hasher.update(frame.event.type_name().as_bytes());
        hasher.update([0u8]);
        hasher.update(frame.event.thread_id.as_bytes());
        hasher.update([0u8]);
        if let Ok(content) = serde_json::to_vec(&frame.event.kind) {
            hasher.update(&content);
        }
        match frame.seq {
            Some(seq) => {
                hasher.update(b"seq");
                hasher.update(seq.to_be_bytes());
            }
            None => {
                hasher.update(b"pos");
                hasher.update(position.to_be_bytes());
            }
        }
        let digest = hasher.finalize();
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        id
    }
}

type ReportHook = Box<dyn Fn(&Value) + Send + Sync>;

/// Stateful wrapper publishing every reconciled state.
pub struct Reconciler {
    state: ReconcilerState,
    grace: Duration,
    pinned: bool,
    updates: watch::Sender<ExecutionState>,
    report_hook: Option<ReportHook>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("state", &self.state)
            .field("grace", &self.grace)
            .field("pinned", &self.pinned)
            .finish()
    }
}

impl Reconciler {
    pub fn new(config: &ClientConfig) -> Self {
        let (updates, _) = watch::channel(ExecutionState::default());
        Self {
            state: ReconcilerState::new(config.max_stream_events),
            grace: config.completion_grace,
            pinned: false,
            updates,
            report_hook: None,
        }
    }

    /// Register the domain callback that receives every `report_state`.
    pub fn on_report_state(&mut self, hook: impl Fn(&Value) + Send + Sync + 'static) {
        self.report_hook = Some(Box::new(hook));
    }

    /// Receive each state as soon as it is reconciled.
    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state.execution
    }

    pub fn inner(&self) -> &ReconcilerState {
        &self.state
    }

    /// Start a fresh thread. `None` adopts the id of the first event.
    pub fn begin(&mut self, thread_id: Option<String>) {
        self.state.reset(thread_id);
        self.pinned = false;
        self.publish();
    }

    /// Prepare for a new stream attempt on the current thread.
    pub fn begin_attempt(&mut self) {
        self.state.clear_seen();
    }

    /// Apply one frame and hand back the updated state.
    ///
    /// A server `error` event comes back as `Err` after the failure is recorded.
    pub fn process(&mut self, frame: &Frame) -> Result<&ExecutionState, StreamError> {
        let effects = self.state.apply(frame);
        let mut failure = None;
        let mut changed = false;
        for effect in effects {
            match effect {
                Effect::StateChanged | Effect::Text(_) => changed = true,
                Effect::ReportState(value) => {
                    if let Some(hook) = &self.report_hook {
                        hook(&value);
                    }
                }
                Effect::Finished { .. } => {
                    self.state.execution.finished_at = Some(Instant::now());
                }
                Effect::Failed(err) => failure = Some(err),
            }
        }
        if changed {
            self.publish();
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(&self.state.execution),
        }
    }

    pub fn seed(&mut self, load: &LoadResponse) {
        self.state.seed(load);
        if load.completed {
            self.state.execution.finished_at = Some(Instant::now());
        }
        self.publish();
    }

    pub fn merge_status(&mut self, resp: &StatusResponse) {
        let was = self.state.execution.status;
        self.state.merge_status(resp);
        if was != ExecutionStatus::Completed
            && self.state.execution.status == ExecutionStatus::Completed
        {
            self.state.execution.finished_at = Some(Instant::now());
        }
        self.publish();
    }

    /// Record a user stop. Everything reconciled so far is kept.
    pub fn mark_stopped(&mut self) {
        self.state.execution.status = ExecutionStatus::Stopped;
        self.publish();
    }

    /// Optimistically mark the thread running ahead of server confirmation.
    pub fn mark_running(&mut self) {
        let exec = &mut self.state.execution;
        exec.status = ExecutionStatus::Running;
        exec.error = None;
        exec.finished_at = None;
        self.publish();
    }

    /// Record a failure that did not come from the server, e.g. a timeout.
    pub fn mark_failed(&mut self, err: &StreamError) {
        let exec = &mut self.state.execution;
        exec.status = ExecutionStatus::Failed;
        exec.error = Some(err.to_string());
        self.publish();
    }

    /// Complete without a `graph_end`, after a benign post-completion close.
    pub fn finalize_local(&mut self) {
        self.state.complete(None);
        self.state.execution.finished_at = Some(Instant::now());
        self.publish();
    }

    /// Keep a finished state indefinitely, as a fixed report.
    pub fn pin_report(&mut self) {
        self.pinned = true;
    }

    /// Clear a completed live state once its grace period has passed.
    ///
    /// Returns `true` when the state was cleared.
    pub fn sweep(&mut self, now: Instant) -> bool {
        if self.pinned || self.state.execution.status != ExecutionStatus::Completed {
            return false;
        }
        let Some(finished) = self.state.execution.finished_at else {
            return false;
        };
        if now < finished + self.grace {
            return false;
        }
        tracing::debug!(thread_id = ?self.state.execution.thread_id, "clearing finished state");
        self.state.reset(None);
        self.publish();
        true
    }

    fn publish(&self) {
        if self.updates.receiver_count() > 0 {
            self.updates.send_replace(self.state.execution.clone());
        }
    }
}
