//! Graph execution seam.
//!
//! A [`GraphRunner`] drives one thread's graph through a [`RunContext`], which
//! owns the emitter and enforces the execution guards. The server ships a
//! [`ScriptedRunner`] that plays declarative steps; real graphs plug in by
//! implementing the trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;

use strand_checkpoint::prelude::Checkpoint;
use strand_core::error::{Result, StrandError};
use strand_core::event::TokenUsage;

use crate::emitter::{Emitter, NodeUpdate};
use crate::guard::{RateGates, StepCounter};

#[async_trait]
pub trait GraphRunner: Send + Sync {
    /// Run the graph to completion and return the final response text.
    async fn run(&self, ctx: RunContext) -> Result<String>;
}

/// Everything a running graph may touch.
pub struct RunContext {
    pub thread_id: String,
    pub input: Value,
    /// Checkpoint the run continues from, when resuming.
    pub resume_from: Option<Checkpoint>,
    emitter: Arc<Emitter>,
    steps: StepCounter,
    rate_gates: RateGates,
    max_rate_wait: Duration,
    cancel: watch::Receiver<bool>,
}

impl RunContext {
    pub fn new(
        emitter: Arc<Emitter>,
        input: Value,
        resume_from: Option<Checkpoint>,
        steps: StepCounter,
        rate_gates: RateGates,
        max_rate_wait: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            thread_id: emitter.thread_id().to_string(),
            input,
            resume_from,
            emitter,
            steps,
            rate_gates,
            max_rate_wait,
            cancel,
        }
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the thread is asked to stop.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        // A closed channel means the registry entry is gone; treat as never cancelled.
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Count a transition into `node` and announce it.
    pub fn enter_node(&self, node: &str, input: Option<&Value>) -> Result<()> {
        if self.is_cancelled() {
            return Err(StrandError::Cancelled);
        }
        self.steps.tick()?;
        self.emitter.node_start(node, input);
        Ok(())
    }

    pub async fn exit_node(&self, node: &str, update: NodeUpdate) -> Result<()> {
        self.emitter.node_end(node, update).await
    }

    /// Wait for the model's rate gate, if it has one.
    pub async fn acquire_model(&self, model: &str) -> Result<()> {
        if let Some(gate) = self.rate_gates.gate_for(model) {
            gate.acquire_within(self.max_rate_wait).await?;
        }
        Ok(())
    }

    /// Sleep, returning early with [`StrandError::Cancelled`] on stop.
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(StrandError::Cancelled),
        }
    }
}

/// One node of a scripted graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedStep {
    pub node: String,
    /// Model to "call" inside the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tool invoked after the model call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Text streamed as `content_chunk` events.
    #[serde(default)]
    pub chunks: Vec<String>,
    #[serde(default)]
    pub delay_ms: u64,
    /// Fail the node with this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
}

impl ScriptedStep {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail = Some(message.into());
        self
    }
}

/// Plays a fixed list of steps, or the `script` array of the run input.
///
/// On resume, steps already counted by the checkpoint are skipped.
#[derive(Debug, Clone)]
pub struct ScriptedRunner {
    steps: Vec<ScriptedStep>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new(vec![
            ScriptedStep::new("planner")
                .with_model("planner-model")
                .with_chunks(&["Planning the answer. "]),
            ScriptedStep::new("researcher")
                .with_model("research-model")
                .with_tool("search")
                .with_chunks(&["Gathering sources. "]),
            ScriptedStep::new("writer")
                .with_model("writer-model")
                .with_chunks(&["Here is the report."]),
        ])
    }
}

impl ScriptedRunner {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self { steps }
    }

    fn steps_for(&self, input: &Value) -> Result<Vec<ScriptedStep>> {
        match input.get("script") {
            Some(script) => Ok(serde_json::from_value(script.clone())?),
            None => Ok(self.steps.clone()),
        }
    }
}

#[async_trait]
impl GraphRunner for ScriptedRunner {
    async fn run(&self, ctx: RunContext) -> Result<String> {
        // A resumed run is handed no input; the original one rides along in the checkpoint.
        let input = match &ctx.resume_from {
            Some(cp) if ctx.input.is_null() => cp.state.get("input").cloned().unwrap_or_default(),
            _ => ctx.input.clone(),
        };
        let steps = self.steps_for(&input)?;
        let skip = ctx.resume_from.as_ref().map_or(0, |cp| cp.step);
        let emitter = ctx.emitter();
        let mut response = String::new();

        for (index, step) in steps.iter().enumerate().skip(skip) {
            emitter.schedule(vec![step.node.clone()]).await?;
            ctx.enter_node(&step.node, Some(&input))?;

            let mut messages = 0;
            if let Some(model) = &step.model {
                ctx.acquire_model(model).await?;
                let run_id = format!("{}-{index}", step.node);
                emitter.llm_start(model, Some(&run_id), Some(&step.node));
                ctx.pause(Duration::from_millis(step.delay_ms)).await?;

                let text: String = step.chunks.concat();
                for chunk in &step.chunks {
                    emitter.content_chunk(chunk.clone());
                }
                response.push_str(&text);

                let tool_calls: Vec<&str> = step.tool.as_deref().into_iter().collect();
                let usage = TokenUsage {
                    input_tokens: step.node.len() as u64,
                    output_tokens: text.len() as u64,
                    total_tokens: (step.node.len() + text.len()) as u64,
                };
                emitter.llm_end(model, Some(&run_id), Some(&text), Some(usage), &tool_calls);
                messages += 1;
            } else {
                ctx.pause(Duration::from_millis(step.delay_ms)).await?;
            }

            if let Some(tool) = &step.tool {
                let args = json!({"node": step.node});
                emitter.tool_start(tool, Some(&args));
                emitter.tool_end(tool, Some(&json!({"ok": true})));
                messages += 1;
            }

            if let Some(message) = &step.fail {
                return Err(StrandError::Node {
                    node: step.node.clone(),
                    message: message.clone(),
                });
            }

            let completed = index + 1;
            ctx.exit_node(
                &step.node,
                NodeUpdate {
                    output: Some(json!(format!("{} done", step.node))),
                    state: Some(json!({"completed_steps": completed, "draft": response, "input": input})),
                    messages_added: messages,
                    report_state: Some(json!({"completed_steps": completed, "total_steps": steps.len()})),
                },
            )
            .await?;
        }

        Ok(response)
    }
}
