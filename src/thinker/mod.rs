pub mod anthropic;
pub mod human;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::conversation::Message;
use crate::dispatch::Stage;
use crate::tools::ToolResult;

/// A single tool invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub args: HashMap<String, String>,
}

/// What the thinker produces each step.
#[derive(Debug, Clone)]
pub enum Step {
    /// Execute tool calls. One item = single call. Multiple = parallel.
    Act {
        thought: String,
        calls: Vec<ToolCall>,
    },
    /// The stage is done; `answer` becomes its reply.
    Finish { thought: String, answer: String },
}

/// Token usage from one or more LLM calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A step plus the tokens it cost, if the thinker knows.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: Step,
    pub usage: Option<TokenUsage>,
}

/// One act step inside a stage: what the thinker wanted and what the tools said.
#[derive(Debug, Clone)]
pub struct Iteration {
    pub thought: String,
    pub calls: Vec<ToolCall>,
    pub results: Vec<ToolResult>,
}

/// Everything a thinker sees when asked for its next step.
#[derive(Debug, Clone)]
pub struct Context {
    pub stage: Stage,
    /// Stage instructions (system prompt).
    pub instructions: String,
    /// The most recent user message.
    pub task: String,
    /// Read-only snapshot of the session log.
    pub conversation: Vec<Message>,
    /// Tool iterations taken so far in this stage.
    pub scratchpad: Vec<Iteration>,
    pub available_tools: Vec<ToolDescription>,
}

/// Describes a tool so the thinker knows what's available.
#[derive(Debug, Clone)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
}

/// The reasoning collaborator behind a stage. Could be an LLM, a human,
/// or a test script.
#[async_trait]
pub trait Thinker: Send + Sync {
    async fn next_step(&self, context: &Context) -> Result<StepResult>;
}
