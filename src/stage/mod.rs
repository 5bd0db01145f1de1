pub mod react;

use async_trait::async_trait;
use std::time::Duration;

use crate::conversation::{ConversationState, Message};
use crate::dispatch::Stage;
use crate::thinker::TokenUsage;

/// Why a stage produced a degraded reply instead of a real one.
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

/// What a stage hands back to the pipeline. Always present, even on failure.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub reply: Message,
    /// Text the router directive is parsed from. `None` means nothing to parse.
    pub routing: Option<String>,
    pub usage: TokenUsage,
    /// True when the reply reports a failure rather than an answer.
    pub degraded: bool,
}

impl StageResult {
    pub fn completed(reply: impl Into<String>, routing: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            reply: Message::assistant(reply),
            routing: Some(routing.into()),
            usage,
            degraded: false,
        }
    }

    pub fn degraded(stage: Stage, failure: &StageFailure, usage: TokenUsage) -> Self {
        Self {
            reply: Message::assistant(format!("The {} stage could not finish: {}", stage, failure)),
            routing: None,
            usage,
            degraded: true,
        }
    }
}

/// One unit of work in the pipeline.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    /// Run against a read-only view of the session. Must not fail: collaborator
    /// errors and timeouts come back as a degraded [`StageResult`].
    async fn run(&self, conversation: &ConversationState, last_user_message: &str) -> StageResult;

    /// Best-effort cleanup of external collaborators after an abort.
    async fn teardown(&self) {}
}
