use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::Engine;
use crate::bridge::{self, BridgeError};
use crate::consts::DEFAULT_MAX_RESEARCH_LOOPS;
use crate::conversation::{ConversationState, Role};
use crate::dispatch::{Dispatcher, Stage, Transition, TransitionTable};
use crate::events::{Event, EventBus};
use crate::routing::Directive;
use crate::stage::StageExecutor;
use crate::thinker::TokenUsage;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no executor registered for reachable stage `{0}`")]
    MissingExecutor(Stage),
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A stage routed to `End`.
    Completed,
    /// The research loop cap forced the end.
    LoopGuard { limit: usize },
    /// Aborted while `stage` was about to run or running.
    Aborted { stage: Stage },
}

/// What one call to [`Pipeline::run_turn`] did.
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Latest assistant reply of this turn.
    pub reply: String,
    /// Stages that completed, in order.
    pub hops: Vec<Stage>,
    pub termination: Termination,
    pub usage: TokenUsage,
}

/// Stops the current turn of the pipeline it came from. Cheap to clone.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

pub struct PipelineBuilder {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
    table: TransitionTable,
    max_research_loops: usize,
    events: Option<Arc<EventBus>>,
}

impl PipelineBuilder {
    /// Register an executor under the stage it reports.
    pub fn stage(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.insert(executor.stage(), executor);
        self
    }

    pub fn table(mut self, table: TransitionTable) -> Self {
        self.table = table;
        self
    }

    pub fn max_research_loops(mut self, limit: usize) -> Self {
        self.max_research_loops = limit;
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if let Some(missing) = self
            .table
            .reachable()
            .into_iter()
            .find(|s| !s.is_terminal() && !self.executors.contains_key(s))
        {
            return Err(PipelineError::MissingExecutor(missing));
        }

        let (tx, _) = watch::channel(false);
        Ok(Pipeline {
            executors: self.executors,
            dispatcher: Dispatcher::new(self.table, self.max_research_loops),
            state: ConversationState::new(),
            events: self.events.unwrap_or_default(),
            abort: Arc::new(tx),
            session_usage: TokenUsage::default(),
        })
    }
}

/// One session: the conversation plus the stages that act on it.
/// Executors may be shared between pipelines; state never is.
pub struct Pipeline {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
    dispatcher: Dispatcher,
    state: ConversationState,
    events: Arc<EventBus>,
    abort: Arc<watch::Sender<bool>>,
    session_usage: TokenUsage,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            executors: HashMap::new(),
            table: TransitionTable::standard(),
            max_research_loops: DEFAULT_MAX_RESEARCH_LOOPS,
            events: None,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: Arc::clone(&self.abort),
        }
    }

    pub fn session_usage(&self) -> TokenUsage {
        self.session_usage
    }

    /// Start over with an empty conversation.
    pub fn reset(&mut self) {
        self.state.clear();
    }

    /// Drive one user message through the stages until one routes to `End`,
    /// the loop guard trips, or the turn is aborted.
    pub async fn run_turn(&mut self, input: &str) -> TurnReport {
        self.abort.send_replace(false);
        let mut abort_rx = self.abort.subscribe();

        self.state.begin_turn(input);
        let turn_start = self.state.messages().len();
        info!(turn = self.state.turn_count(), "turn started");

        let mut stage = self.dispatcher.initial();
        let mut hops = Vec::new();
        let mut usage = TokenUsage::default();

        let termination = loop {
            if stage.is_terminal() {
                break Termination::Completed;
            }
            let stop = *abort_rx.borrow();
            if stop {
                break self.abort_turn(stage).await;
            }
            let Some(executor) = self.executors.get(&stage).cloned() else {
                warn!(%stage, "no executor, ending turn");
                break Termination::Completed;
            };

            self.events.emit(Event::StageStarted { stage });
            let last_user = self
                .state
                .last_user_message()
                .map(|m| m.content.clone())
                .unwrap_or_default();

            let result = tokio::select! {
                result = executor.run(&self.state, &last_user) => Some(result),
                _ = aborted(&mut abort_rx) => None,
            };
            let Some(result) = result else {
                break self.abort_turn(stage).await;
            };

            // Parsed for every stage; the table decides whether it matters.
            let directive = Directive::from_routing(result.routing.as_deref());
            let transition = self
                .dispatcher
                .next(stage, directive, self.state.research_loops());
            let next = transition.next_stage();

            let mut reply = result.reply;
            if let Transition::LoopGuard { limit } = transition {
                reply.content.push_str(&format!(
                    "\n\n[stopped: reached the limit of {} research rounds without a final route]",
                    limit
                ));
                self.events.emit(Event::LoopGuardTripped { limit });
            }

            self.state.commit_hop(reply, directive, next);
            usage.add(result.usage);
            hops.push(stage);
            info!(%stage, %directive, %next, degraded = result.degraded, "stage completed");
            self.events.emit(Event::StageCompleted {
                stage,
                directive,
                next,
            });

            if let Transition::LoopGuard { limit } = transition {
                break Termination::LoopGuard { limit };
            }
            stage = next;
        };

        self.session_usage.add(usage);

        let reply = self.state.messages()[turn_start..]
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "turn aborted before any stage replied".to_string());

        TurnReport {
            reply,
            hops,
            termination,
            usage,
        }
    }

    /// [`run_turn`](Self::run_turn) for synchronous callers.
    pub fn run_turn_blocking(&mut self, input: &str) -> Result<TurnReport, BridgeError> {
        bridge::block_on(self.run_turn(input))
    }

    async fn abort_turn(&self, stage: Stage) -> Termination {
        warn!(%stage, "turn aborted");
        for executor in self.executors.values() {
            executor.teardown().await;
        }
        self.events.emit(Event::TurnAborted { stage });
        Termination::Aborted { stage }
    }
}

/// Resolves once the abort flag is raised.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        let raised = *rx.borrow_and_update();
        if raised {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can abort any more.
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Engine for Pipeline {
    async fn run(&mut self, task: &str) -> Result<String> {
        Ok(self.run_turn(task).await.reply)
    }
}
