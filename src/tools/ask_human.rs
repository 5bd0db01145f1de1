use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, Write};

use super::{Tool, required_arg};

/// Asks the operator a clarifying question and returns the typed answer.
pub struct AskHumanTool;

impl AskHumanTool {
    fn ask(question: &str) -> Result<String> {
        println!("\n[question] {}", question);
        print!("your answer: ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        Ok(answer.trim().to_string())
    }
}

#[async_trait]
impl Tool for AskHumanTool {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question when the task lacks detail. Args: {\"query\": \"<question>\"}"
    }

    async fn execute(&self, args: &HashMap<String, String>) -> Result<String> {
        let question = required_arg(args, "query")?.to_string();
        let answer = tokio::task::spawn_blocking(move || Self::ask(&question))
            .await
            .context("input task panicked")??;

        if answer.is_empty() {
            bail!("the user gave no answer");
        }
        Ok(answer)
    }
}
