//! The routing state machine.
//!
//! Transitions live in a [`TransitionTable`] as data. Only the router
//! branches on a directive; every other stage has a fixed successor.
//! The [`Dispatcher`] adds the loop guard on top of the table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use tracing::warn;

use crate::consts::DEFAULT_MAX_RESEARCH_LOOPS;
use crate::routing::Directive;

/// A node in the pipeline. `Start` and `End` are pseudo-stages with no executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Start,
    Router,
    Researcher,
    Static,
    Dynamic,
    End,
}

impl Stage {
    /// Stages that do real work.
    pub const EXECUTABLE: [Stage; 4] = [Stage::Router, Stage::Researcher, Stage::Static, Stage::Dynamic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Router => "router",
            Self::Researcher => "researcher",
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::End => "end",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "router" => Some(Self::Router),
            "researcher" => Some(Self::Researcher),
            "static" => Some(Self::Static),
            "dynamic" => Some(Self::Dynamic),
            "end" => Some(Self::End),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::End
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outgoing edges of one stage.
#[derive(Debug, Clone)]
pub struct TransitionEntry {
    /// Directive-specific successors. Empty for stages that ignore directives.
    pub routes: Vec<(Directive, Stage)>,
    /// Successor when the directive is missing or has no route.
    pub default: Stage,
}

impl TransitionEntry {
    pub fn unconditional(next: Stage) -> Self {
        Self {
            routes: Vec::new(),
            default: next,
        }
    }

    fn resolve(&self, directive: Directive) -> Stage {
        self.routes
            .iter()
            .find(|(d, _)| *d == directive)
            .map(|(_, stage)| *stage)
            .unwrap_or(self.default)
    }
}

/// Static transition configuration. Not mutated while a pipeline runs.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    entries: HashMap<Stage, TransitionEntry>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, from: Stage, entry: TransitionEntry) -> Self {
        self.entries.insert(from, entry);
        self
    }

    /// The router/researcher/static/dynamic pipeline.
    pub fn standard() -> Self {
        Self::new()
            .with(Stage::Start, TransitionEntry::unconditional(Stage::Router))
            .with(
                Stage::Router,
                TransitionEntry {
                    routes: vec![
                        (Directive::Researcher, Stage::Researcher),
                        (Directive::Static, Stage::Static),
                        (Directive::Dynamic, Stage::Dynamic),
                        (Directive::End, Stage::End),
                    ],
                    default: Stage::End,
                },
            )
            .with(Stage::Researcher, TransitionEntry::unconditional(Stage::Router))
            .with(Stage::Static, TransitionEntry::unconditional(Stage::End))
            .with(Stage::Dynamic, TransitionEntry::unconditional(Stage::End))
    }

    pub fn entry(&self, from: Stage) -> Option<&TransitionEntry> {
        self.entries.get(&from)
    }

    /// Every stage reachable from `Start`, in breadth-first order.
    pub fn reachable(&self) -> Vec<Stage> {
        let mut seen = HashSet::from([Stage::Start]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([Stage::Start]);

        while let Some(stage) = queue.pop_front() {
            let Some(entry) = self.entries.get(&stage) else {
                continue;
            };
            let successors = entry.routes.iter().map(|(_, s)| *s).chain([entry.default]);
            for next in successors {
                if seen.insert(next) {
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }

        order
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// What the dispatcher decided after a stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Continue with the given stage (possibly `End`).
    Goto(Stage),
    /// The research loop hit its cap; the turn ends here.
    LoopGuard { limit: usize },
}

impl Transition {
    pub fn next_stage(&self) -> Stage {
        match self {
            Self::Goto(stage) => *stage,
            Self::LoopGuard { .. } => Stage::End,
        }
    }
}

pub struct Dispatcher {
    table: TransitionTable,
    loop_stage: Stage,
    max_loops: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(TransitionTable::standard(), DEFAULT_MAX_RESEARCH_LOOPS)
    }
}

impl Dispatcher {
    /// `max_loops` caps how many times a single turn may enter the researcher.
    pub fn new(table: TransitionTable, max_loops: usize) -> Self {
        Self {
            table,
            loop_stage: Stage::Researcher,
            max_loops,
        }
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn max_loops(&self) -> usize {
        self.max_loops
    }

    /// First real stage of every turn.
    pub fn initial(&self) -> Stage {
        self.table
            .entry(Stage::Start)
            .map(|e| e.default)
            .unwrap_or(Stage::End)
    }

    /// Decide the successor of `from` given the parsed directive and the
    /// number of research loops already taken this turn.
    pub fn next(&self, from: Stage, directive: Directive, loops_taken: usize) -> Transition {
        let Some(entry) = self.table.entry(from) else {
            if !from.is_terminal() {
                warn!(stage = %from, "no transition entry, ending turn");
            }
            return Transition::Goto(Stage::End);
        };

        let next = entry.resolve(directive);
        if next == self.loop_stage && loops_taken >= self.max_loops {
            warn!(limit = self.max_loops, "research loop limit reached");
            return Transition::LoopGuard {
                limit: self.max_loops,
            };
        }

        Transition::Goto(next)
    }
}
