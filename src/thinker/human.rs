use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, Write};

use super::{Context, Step, StepResult, Thinker, ToolCall};
use crate::tools::Outcome;

/// You are the brain. Type thoughts and actions at the terminal.
///
/// As the router, finish with an answer such as `next: static`.
pub struct HumanThinker;

impl HumanThinker {
    fn read_line(prompt: &str) -> Result<String> {
        print!("{}", prompt);
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    fn print_context(context: &Context) {
        println!("\n{}", "=".repeat(60));
        println!("Stage: {}", context.stage);
        println!("Task: {}", context.task);
        println!("{}", "-".repeat(60));

        if !context.conversation.is_empty() {
            println!("Conversation:");
            for message in &context.conversation {
                println!("  {}", message);
            }
            println!("{}", "-".repeat(60));
        }

        for iteration in &context.scratchpad {
            println!("Thought: {}", iteration.thought);
            for result in &iteration.results {
                match &result.outcome {
                    Outcome::Success(out) => println!("  [{}] ✓ {}", result.tool, out),
                    Outcome::Error(err) => println!("  [{}] ✗ {}", result.tool, err),
                }
            }
        }

        println!("Available tools:");
        for tool in &context.available_tools {
            println!("  {} — {}", tool.name, tool.description);
        }
        println!("{}", "=".repeat(60));
    }

    /// Parse `tool:arg` or `tool:key=val,key=val`, several separated by `;`.
    fn parse_calls(action: &str) -> Vec<ToolCall> {
        action
            .split(';')
            .map(|call| {
                let call = call.trim();
                let (tool, args_str) = call.split_once(':').unwrap_or((call, ""));

                let mut args = HashMap::new();
                if !args_str.is_empty() {
                    if args_str.contains('=') {
                        for pair in args_str.split(',') {
                            if let Some((k, v)) = pair.split_once('=') {
                                args.insert(k.trim().to_string(), v.trim().to_string());
                            }
                        }
                    } else {
                        args.insert("query".to_string(), args_str.trim().to_string());
                        args.insert("command".to_string(), args_str.trim().to_string());
                    }
                }

                ToolCall {
                    tool: tool.trim().to_string(),
                    args,
                }
            })
            .collect()
    }
}

#[async_trait]
impl Thinker for HumanThinker {
    async fn next_step(&self, context: &Context) -> Result<StepResult> {
        Self::print_context(context);

        let thought = Self::read_line("\nThought: ")?;
        let action = Self::read_line("Action (tool:arg or 'finish'): ")?;

        let step = if action == "finish" {
            let answer = Self::read_line("Answer: ")?;
            Step::Finish { thought, answer }
        } else {
            Step::Act {
                thought,
                calls: Self::parse_calls(&action),
            }
        };

        Ok(StepResult { step, usage: None })
    }
}
