use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::consts::DEFAULT_MODEL;
use crate::conversation::Role;
use crate::tools::Outcome;

use super::{Context, Step, StepResult, Thinker, TokenUsage, ToolCall};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// A thinker backed by the Anthropic Messages API.
pub struct AnthropicThinker {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicThinker {
    pub fn new(model: Option<String>, api_key: String, client: reqwest::Client) -> Self {
        Self {
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            client,
        }
    }

    /// Read the key from `ANTHROPIC_API_KEY`.
    pub fn from_env(model: Option<String>, client: reqwest::Client) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("no Anthropic credentials found. Set {}.", API_KEY_ENV))?;
        Ok(Self::new(model, api_key, client))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Conversation, then this stage's own tool iterations, then a nudge
    /// naming the task. Consecutive same-role turns are merged.
    fn build_messages(context: &Context) -> Vec<ApiMessage> {
        let mut messages: Vec<ApiMessage> = Vec::new();

        for message in &context.conversation {
            push_merged(&mut messages, message.role, message.content.clone());
        }

        for iteration in &context.scratchpad {
            let calls: Vec<serde_json::Value> = iteration
                .calls
                .iter()
                .map(|c| serde_json::json!({ "tool": c.tool, "args": c.args }))
                .collect();
            let assistant_msg = serde_json::json!({
                "thought": iteration.thought,
                "action": { "calls": calls }
            });
            push_merged(&mut messages, Role::Assistant, assistant_msg.to_string());

            let mut observation = String::from("Tool results:\n");
            for result in &iteration.results {
                match &result.outcome {
                    Outcome::Success(out) => {
                        observation.push_str(&format!("[{}] ✓ {}\n", result.tool, out));
                    }
                    Outcome::Error(err) => {
                        observation.push_str(&format!("[{}] ✗ {}\n", result.tool, err));
                    }
                }
            }
            push_merged(&mut messages, Role::User, observation);
        }

        if messages.last().is_none_or(|m| m.role != Role::User.as_str()) {
            push_merged(
                &mut messages,
                Role::User,
                format!("Continue as the {} stage. Task: {}", context.stage, context.task),
            );
        }

        messages
    }

    fn parse_response(text: &str) -> Result<Step> {
        let json_str = extract_json(text);

        let response: serde_json::Value = match serde_json::from_str(json_str) {
            Ok(value) => value,
            Err(e) => {
                // A plain-text reply is still a usable answer.
                warn!(error = %e, "model reply is not JSON, using it verbatim");
                return Ok(Step::Finish {
                    thought: String::new(),
                    answer: text.trim().to_string(),
                });
            }
        };

        let thought = response
            .get("thought")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if let Some(answer) = response.get("answer") {
            let answer = match answer {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(Step::Finish { thought, answer });
        }

        if let Some(action) = response.get("action")
            && let Some(calls) = action.get("calls").and_then(|c| c.as_array())
        {
            let tool_calls: Vec<ToolCall> = calls
                .iter()
                .filter_map(|call| {
                    let tool = call.get("tool")?.as_str()?.to_string();
                    let args = call
                        .get("args")
                        .and_then(|a| a.as_object())
                        .map(|obj| {
                            obj.iter()
                                .map(|(k, v)| {
                                    let val = match v {
                                        serde_json::Value::String(s) => s.clone(),
                                        other => other.to_string(),
                                    };
                                    (k.clone(), val)
                                })
                                .collect()
                        })
                        .unwrap_or_else(HashMap::new);
                    Some(ToolCall { tool, args })
                })
                .collect();

            if tool_calls.is_empty() {
                bail!("LLM returned action with no valid tool calls: {}", text);
            }

            return Ok(Step::Act {
                thought,
                calls: tool_calls,
            });
        }

        bail!("LLM response is neither an answer nor a tool call: {}", text)
    }
}

#[async_trait]
impl Thinker for AnthropicThinker {
    async fn next_step(&self, context: &Context) -> Result<StepResult> {
        let messages = Self::build_messages(context);
        let body = ApiRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: &context.instructions,
            messages: &messages,
        };

        let resp = self
            .client
            .post(API_URL)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic API error ({}): {}", status, text);
        }

        let api_resp: ApiResponse = resp.json().await?;

        let text: String = api_resp
            .content
            .iter()
            .filter_map(|block| {
                if block.content_type == "text" {
                    block.text.as_deref()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            bail!("Anthropic API returned empty response");
        }

        let usage = api_resp.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });
        debug!(stage = %context.stage, model = %self.model, ?usage, "model replied");

        Ok(StepResult {
            step: Self::parse_response(&text)?,
            usage,
        })
    }
}

fn push_merged(messages: &mut Vec<ApiMessage>, role: Role, content: String) {
    match messages.last_mut() {
        Some(last) if last.role == role.as_str() => {
            last.content.push_str("\n\n");
            last.content.push_str(&content);
        }
        _ => messages.push(ApiMessage {
            role: role.as_str().to_string(),
            content,
        }),
    }
}

/// Extract JSON from text that may be wrapped in markdown code fences.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(after) = trimmed.strip_prefix("```json")
        && let Some(json) = after.strip_suffix("```")
    {
        return json.trim();
    }
    if let Some(after) = trimmed.strip_prefix("```")
        && let Some(json) = after.strip_suffix("```")
    {
        return json.trim();
    }

    trimmed
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ApiMessage],
}

#[derive(Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}
