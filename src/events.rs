//! Decoupled event bus for pipeline progress.
//!
//! The pipeline and its stages emit events via [`EventBus::emit`]; front
//! ends subscribe via [`EventBus::subscribe`]. Built on
//! [`tokio::sync::broadcast`] so multiple listeners can react independently.

use tokio::sync::broadcast;

use crate::dispatch::Stage;
use crate::routing::Directive;

/// Events that flow through the system.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A stage began running.
    StageStarted { stage: Stage },
    /// A stage called a tool.
    ToolCalled { stage: Stage, tool: String, ok: bool },
    /// A stage finished and the dispatcher picked its successor.
    StageCompleted {
        stage: Stage,
        directive: Directive,
        next: Stage,
    },
    /// The research loop cap ended the turn.
    LoopGuardTripped { limit: usize },
    /// The turn was aborted while `stage` was in flight.
    TurnAborted { stage: Stage },
}

/// A broadcast channel that any component can emit to or subscribe from.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to future events (past ones are not replayed).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
