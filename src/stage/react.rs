use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{StageExecutor, StageFailure, StageResult};
use crate::consts::{DEFAULT_MAX_STEPS, DEFAULT_STAGE_TIMEOUT_SECS, DEFAULT_TOOL_TIMEOUT_SECS};
use crate::conversation::ConversationState;
use crate::dispatch::Stage;
use crate::events::{Event, EventBus};
use crate::prompts::build_stage_prompt;
use crate::thinker::{Context, Iteration, Step, Thinker, TokenUsage};
use crate::tools::{Outcome, ToolRegistry, ToolResult};

#[derive(Debug, Clone)]
pub struct StageConfig {
    pub max_steps: usize,
    pub tool_timeout: Duration,
    pub stage_timeout: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
        }
    }
}

/// A stage driven by a reason/act loop: the thinker either calls tools or
/// finishes with a reply. Tool observations stay private to the stage run.
pub struct ReactStage {
    stage: Stage,
    thinker: RwLock<Box<dyn Thinker>>,
    tools: Arc<ToolRegistry>,
    config: StageConfig,
    events: Option<Arc<EventBus>>,
}

impl ReactStage {
    pub fn new(stage: Stage, thinker: Box<dyn Thinker>, tools: Arc<ToolRegistry>, config: StageConfig) -> Self {
        Self {
            stage,
            thinker: RwLock::new(thinker),
            tools,
            config,
            events: None,
        }
    }

    /// Report tool calls on the given bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Swap the thinker at runtime. The next step will use the new one.
    pub async fn set_thinker(&self, thinker: Box<dyn Thinker>) {
        *self.thinker.write().await = thinker;
    }

    /// Returns `(thought, answer)` of the finishing step.
    async fn work(
        &self,
        conversation: &ConversationState,
        task: &str,
        usage: &mut TokenUsage,
    ) -> Result<(String, String)> {
        let available_tools = self.tools.descriptions().await;
        let mut context = Context {
            stage: self.stage,
            instructions: build_stage_prompt(self.stage, &available_tools),
            task: task.to_string(),
            conversation: conversation.messages().to_vec(),
            scratchpad: Vec::new(),
            available_tools,
        };

        for step_no in 1..=self.config.max_steps {
            let result = {
                let thinker = self.thinker.read().await;
                thinker.next_step(&context).await?
            };
            if let Some(step_usage) = result.usage {
                usage.add(step_usage);
            }

            match result.step {
                Step::Act { thought, calls } => {
                    debug!(stage = %self.stage, step = step_no, calls = calls.len(), %thought, "acting");

                    let timeout = self.config.tool_timeout;
                    let futures: Vec<_> = calls
                        .iter()
                        .map(|call| {
                            let tools = Arc::clone(&self.tools);
                            async move {
                                match tokio::time::timeout(timeout, tools.execute(&call.tool, &call.args)).await {
                                    Ok(result) => result,
                                    Err(_) => ToolResult {
                                        tool: call.tool.clone(),
                                        outcome: Outcome::Error("timed out".to_string()),
                                    },
                                }
                            }
                        })
                        .collect();

                    let results = futures::future::join_all(futures).await;

                    if let Some(events) = &self.events {
                        for result in &results {
                            events.emit(Event::ToolCalled {
                                stage: self.stage,
                                tool: result.tool.clone(),
                                ok: result.outcome.is_ok(),
                            });
                        }
                    }

                    context.scratchpad.push(Iteration {
                        thought,
                        calls,
                        results,
                    });
                }
                Step::Finish { thought, answer } => {
                    debug!(stage = %self.stage, step = step_no, "finished");
                    return Ok((thought, answer));
                }
            }
        }

        bail!("max steps ({}) reached", self.config.max_steps)
    }
}

#[async_trait]
impl StageExecutor for ReactStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn run(&self, conversation: &ConversationState, last_user_message: &str) -> StageResult {
        let mut usage = TokenUsage::default();
        let outcome = tokio::time::timeout(
            self.config.stage_timeout,
            self.work(conversation, last_user_message, &mut usage),
        )
        .await;

        match outcome {
            Ok(Ok((thought, answer))) => {
                // The answer goes last so a free-text decision there wins.
                let routing = if thought.is_empty() {
                    answer.clone()
                } else {
                    format!("{}\n{}", thought, answer)
                };
                StageResult::completed(answer, routing, usage)
            }
            Ok(Err(e)) => {
                warn!(stage = %self.stage, error = %e, "stage failed");
                StageResult::degraded(self.stage, &StageFailure::Collaborator(e), usage)
            }
            Err(_) => {
                warn!(stage = %self.stage, timeout = ?self.config.stage_timeout, "stage timed out");
                StageResult::degraded(self.stage, &StageFailure::TimedOut(self.config.stage_timeout), usage)
            }
        }
    }

    async fn teardown(&self) {
        self.tools.teardown_all().await;
    }
}
