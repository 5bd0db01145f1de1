pub mod pipeline;

use anyhow::Result;
use async_trait::async_trait;

/// Anything that turns one user message into a reply.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Handle one user message and return the reply to show.
    async fn run(&mut self, task: &str) -> Result<String>;
}
