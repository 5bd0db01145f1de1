//! Per-session conversation state.
//!
//! The message log is append-only. A stage hop is committed in one call
//! ([`ConversationState::commit_hop`]) so a reply is never recorded without
//! its directive, or the other way round.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dispatch::Stage;
use crate::routing::Directive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry in the log. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.role.as_str(), self.content)
    }
}

/// Everything one session remembers. Owned by a single pipeline.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    current_directive: Option<Directive>,
    turn_count: usize,
    research_loops: usize,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn current_directive(&self) -> Option<Directive> {
        self.current_directive
    }

    /// Number of user turns started in this session.
    pub fn turn_count(&self) -> usize {
        self.turn_count
    }

    /// Researcher round trips taken in the current turn.
    pub fn research_loops(&self) -> usize {
        self.research_loops
    }

    /// Most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Open a new turn: append the user's message and reset per-turn counters.
    pub fn begin_turn(&mut self, input: impl Into<String>) {
        self.messages.push(Message::user(input));
        self.current_directive = None;
        self.research_loops = 0;
        self.turn_count += 1;
    }

    /// Record a finished stage hop: the stage's reply, the directive parsed
    /// from it, and whether the hop enters the research loop.
    pub fn commit_hop(&mut self, reply: Message, directive: Directive, next: Stage) {
        self.messages.push(reply);
        self.current_directive = Some(directive);
        if next == Stage::Researcher {
            self.research_loops += 1;
        }
    }

    /// Forget everything, as if the session had just started.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let state = ConversationState::new();
        assert!(state.messages().is_empty());
        assert_eq!(state.current_directive(), None);
        assert_eq!(state.turn_count(), 0);
        assert!(state.last_user_message().is_none());
    }

    #[test]
    fn begin_turn_appends_user_message() {
        let mut state = ConversationState::new();
        state.begin_turn("scan my repo");

        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.turn_count(), 1);
        assert_eq!(state.last_user_message().unwrap().content, "scan my repo");
    }

    #[test]
    fn commit_hop_records_reply_and_directive_together() {
        let mut state = ConversationState::new();
        state.begin_turn("task");
        state.commit_hop(Message::assistant("go static"), Directive::Static, Stage::Static);

        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages().last().unwrap().role, Role::Assistant);
        assert_eq!(state.current_directive(), Some(Directive::Static));
        assert_eq!(state.research_loops(), 0);
    }

    #[test]
    fn research_loops_count_entries_into_researcher() {
        let mut state = ConversationState::new();
        state.begin_turn("task");
        state.commit_hop(Message::assistant("r"), Directive::Researcher, Stage::Researcher);
        state.commit_hop(Message::assistant("found"), Directive::End, Stage::Router);
        state.commit_hop(Message::assistant("r"), Directive::Researcher, Stage::Researcher);
        assert_eq!(state.research_loops(), 2);
    }

    #[test]
    fn new_turn_resets_per_turn_counters_but_keeps_log() {
        let mut state = ConversationState::new();
        state.begin_turn("first");
        state.commit_hop(Message::assistant("r"), Directive::Researcher, Stage::Researcher);
        state.begin_turn("second");

        assert_eq!(state.research_loops(), 0);
        assert_eq!(state.current_directive(), None);
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.turn_count(), 2);
        assert_eq!(state.last_user_message().unwrap().content, "second");
    }

    #[test]
    fn clear_resets_everything() {
        let mut state = ConversationState::new();
        state.begin_turn("first");
        state.clear();
        assert!(state.messages().is_empty());
        assert_eq!(state.turn_count(), 0);
    }

    #[test]
    fn message_display_includes_role() {
        assert_eq!(Message::user("hi").to_string(), "[user] hi");
        assert_eq!(Message::assistant("yo").to_string(), "[assistant] yo");
    }
}
