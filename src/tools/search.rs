use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;

use super::{Tool, required_arg};

const API_URL: &str = "https://api.duckduckgo.com/";
const MAX_RESULTS: usize = 5;

/// Web search through the DuckDuckGo instant answer API.
pub struct SearchTool {
    client: reqwest::Client,
}

impl SearchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Flatten an instant-answer payload into at most `MAX_RESULTS` lines.
    fn summarize(body: &Value) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(text) = body.get("AbstractText").and_then(Value::as_str)
            && !text.is_empty()
        {
            let source = body.get("AbstractURL").and_then(Value::as_str).unwrap_or("");
            lines.push(format!("{} ({})", text, source));
        }
        if let Some(answer) = body.get("Answer").and_then(Value::as_str)
            && !answer.is_empty()
        {
            lines.push(answer.to_string());
        }

        // Related topics are either entries or groups of entries.
        let topics = body
            .get("RelatedTopics")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .flat_map(|topic| match topic.get("Topics").and_then(Value::as_array) {
                Some(group) => group.iter().collect::<Vec<_>>(),
                None => vec![topic],
            });
        for topic in topics {
            if let Some(text) = topic.get("Text").and_then(Value::as_str) {
                lines.push(text.to_string());
            }
        }

        lines.truncate(MAX_RESULTS);
        lines
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Args: {\"query\": \"<search terms>\"}"
    }

    async fn execute(&self, args: &HashMap<String, String>) -> Result<String> {
        let query = required_arg(args, "query")?;
        let url = Url::parse_with_params(
            API_URL,
            &[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ],
        )?;

        let resp = self.client.get(url).send().await.context("search request failed")?;
        if !resp.status().is_success() {
            bail!("search API error ({})", resp.status());
        }
        let body: Value = resp.json().await.context("search returned invalid JSON")?;

        let lines = Self::summarize(&body);
        if lines.is_empty() {
            return Ok(format!("no results for \"{}\"", query));
        }
        Ok(lines.join("\n"))
    }
}
