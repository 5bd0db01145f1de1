pub mod ask_human;
pub mod search;
pub mod shell;
pub mod wikipedia;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::thinker::ToolDescription;

/// Outcome of a single tool execution. Errors are information, not failures.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Outcome {
    Success(String),
    Error(String),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Result of executing a tool call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub outcome: Outcome,
}

/// Something a stage can do.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, args: &HashMap<String, String>) -> Result<String>;

    /// Best-effort cleanup when a turn is aborted, for state that outlives
    /// a call. Work still running inside `execute` is cancelled by dropping
    /// its future; `ShellTool` relies on that (`kill_on_drop`) and keeps
    /// the default.
    async fn teardown(&self) {}
}

/// Holds the tools of one stage. RwLock allows runtime registration + parallel reads.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name, tool);
    }

    pub async fn execute(&self, tool_name: &str, args: &HashMap<String, String>) -> ToolResult {
        let tool = self.tools.read().await.get(tool_name).cloned();
        let outcome = match tool {
            Some(tool) => match tool.execute(args).await {
                Ok(output) => Outcome::Success(output),
                Err(e) => Outcome::Error(e.to_string()),
            },
            None => Outcome::Error(format!("unknown tool: {}", tool_name)),
        };
        debug!(tool = tool_name, ok = outcome.is_ok(), "tool executed");

        ToolResult {
            tool: tool_name.to_string(),
            outcome,
        }
    }

    /// Descriptions sorted by name so prompts are stable.
    pub async fn descriptions(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .read()
            .await
            .values()
            .map(|t| ToolDescription {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect();
        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    pub async fn teardown_all(&self) {
        let tools: Vec<Arc<dyn Tool>> = self.tools.read().await.values().cloned().collect();
        for tool in tools {
            tool.teardown().await;
        }
    }
}

/// Required string argument, with a readable error when missing or blank.
pub(crate) fn required_arg<'a>(args: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    match args.get(key).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => anyhow::bail!("missing required arg: {}", key),
    }
}

/// Cut `text` to at most `max_bytes` on a char boundary, noting the cut.
pub(crate) fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n\n[truncated: showing {}/{} bytes]",
        &text[..end],
        end,
        text.len()
    )
}
