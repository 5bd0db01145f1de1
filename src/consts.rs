//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Default Anthropic model when none is specified.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Researcher round trips allowed in one turn before the loop guard ends it.
pub const DEFAULT_MAX_RESEARCH_LOOPS: usize = 5;

/// Upper bound on a single stage, including all of its tool calls.
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 60;

/// Upper bound on a single tool call.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Reason/act steps a stage may take before it gives up.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// Default preference database: `~/.triage/triage.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".triage")
        .join("triage.db")
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
