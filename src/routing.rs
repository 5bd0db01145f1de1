//! Turns free-form stage output into a routing [`Directive`].
//!
//! Two passes, first success wins:
//!
//! 1. The first line shaped like `next: <word>` (case-insensitive). If the
//!    word is a known route it is returned immediately.
//! 2. Otherwise every standalone route keyword in the whole text is
//!    collected and the **last** one wins.
//!
//! Anything else is [`Directive::End`]. The first-match / last-match split is
//! part of the contract: an explicit line is authoritative, free text is
//! disambiguated by recency.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

static NEXT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[^\S\n]*next[^\S\n]*:[^\S\n]*([A-Za-z]+)[^\S\n]*$").expect("valid next-line regex")
});

static KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(Researcher|Research|Static|Dynamic|End)\b").expect("valid keyword regex")
});

/// The canonical control value extracted from a stage's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Researcher,
    Static,
    Dynamic,
    End,
}

impl Directive {
    /// Map a raw keyword to its canonical directive.
    /// The word is trimmed and title-cased first, so `"  STATIC "` works.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match title_case(word.trim()).as_str() {
            "Research" | "Researcher" => Some(Self::Researcher),
            "Static" => Some(Self::Static),
            "Dynamic" => Some(Self::Dynamic),
            "End" => Some(Self::End),
            _ => None,
        }
    }

    /// Parse optional routing text. Missing text means nothing was found.
    pub fn from_routing(text: Option<&str>) -> Self {
        text.map(extract_route).unwrap_or(Self::End)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "Researcher",
            Self::Static => "Static",
            Self::Dynamic => "Dynamic",
            Self::End => "End",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the routing directive from arbitrary text. Total and pure.
pub fn extract_route(text: &str) -> Directive {
    if let Some(caps) = NEXT_LINE.captures(text) {
        let word = &caps[1];
        if let Some(directive) = Directive::from_keyword(word) {
            trace!(%directive, "explicit next: line");
            return directive;
        }
        debug!(word, "next: line names an unknown route, scanning free text");
    }

    match KEYWORD.find_iter(text).last() {
        Some(m) => Directive::from_keyword(m.as_str()).unwrap_or(Directive::End),
        None => Directive::End,
    }
}

/// Same as [`extract_route`] for loosely typed collaborator output.
/// Only JSON strings are inspected; every other value routes to `End`.
pub fn extract_route_value(value: &Value) -> Directive {
    match value {
        Value::String(text) => extract_route(text),
        _ => Directive::End,
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
