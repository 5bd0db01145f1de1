use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;

use super::{Tool, required_arg, truncate};

const SEARCH_URL: &str = "https://en.wikipedia.org/w/api.php";
const SUMMARY_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary/";
const MAX_EXTRACT_BYTES: usize = 2_000;

/// Knowledge lookup: best matching Wikipedia article, summarized.
pub struct WikipediaTool {
    client: reqwest::Client,
}

impl WikipediaTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn best_title(&self, query: &str) -> Result<Option<String>> {
        let url = Url::parse_with_params(
            SEARCH_URL,
            &[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", "1"),
                ("format", "json"),
            ],
        )?;
        let resp = self.client.get(url).send().await.context("wikipedia search failed")?;
        if !resp.status().is_success() {
            bail!("wikipedia API error ({})", resp.status());
        }
        let body: SearchResponse = resp.json().await.context("wikipedia returned invalid JSON")?;
        Ok(body.query.search.into_iter().next().map(|hit| hit.title))
    }

    async fn summary(&self, title: &str) -> Result<Summary> {
        let mut url = Url::parse(SUMMARY_URL)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("summary URL cannot be a base"))?
            .pop_if_empty()
            .push(&title.replace(' ', "_"));

        let resp = self.client.get(url).send().await.context("wikipedia summary failed")?;
        if !resp.status().is_success() {
            bail!("wikipedia summary error ({})", resp.status());
        }
        Ok(resp.json().await?)
    }

    fn render(summary: &Summary) -> String {
        format!(
            "Page: {}\nSummary: {}",
            summary.title,
            truncate(&summary.extract, MAX_EXTRACT_BYTES)
        )
    }
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "Look up a topic on Wikipedia and return a short summary. Args: {\"query\": \"<topic>\"}"
    }

    async fn execute(&self, args: &HashMap<String, String>) -> Result<String> {
        let query = required_arg(args, "query")?;
        let Some(title) = self.best_title(query).await? else {
            return Ok(format!("No good Wikipedia search result was found for \"{}\"", query));
        };
        let summary = self.summary(&title).await?;
        Ok(Self::render(&summary))
    }
}

// --- API types ---

#[derive(Deserialize)]
struct SearchResponse {
    query: SearchQuery,
}

#[derive(Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Deserialize)]
struct Summary {
    title: String,
    #[serde(default)]
    extract: String,
}
