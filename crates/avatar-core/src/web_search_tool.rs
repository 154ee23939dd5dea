use anyhow::{bail, Result};
use async_trait::async_trait;
use avatar_provider::ToolDef;
use serde::Deserialize;
use tracing::warn;

use super::tool::{int_arg, str_arg, ToolExecutor, ToolOutput};

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const DEFAULT_COUNT: i64 = 5;
const MAX_COUNT: i64 = 20;
const DEFAULT_TIMEOUT_SECS: u64 = 15;

pub struct WebSearchTool {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            endpoint: BRAVE_SEARCH_URL.to_string(),
            client,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn search(&self, query: &str, count: i64) -> Result<Vec<BraveWebResult>> {
        let resp = self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query.to_string()), ("count", count.to_string())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Brave Search API error (HTTP {status}): {body}");
        }
        let parsed: BraveSearchResponse = resp.json().await?;
        Ok(parsed.web.map(|w| w.results).unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct BraveSearchResponse {
    web: Option<BraveWebResults>,
}

#[derive(Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveWebResult>,
}

#[derive(Deserialize)]
struct BraveWebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

#[async_trait]
impl ToolExecutor for WebSearchTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "web_search",
            "Search the web using Brave Search. Use this to find current information, answer questions about recent events, or look up facts.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query."
                    },
                    "count": {
                        "type": "integer",
                        "description": "Number of results to return (default 5, max 20)."
                    }
                },
                "required": ["query"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let query = str_arg(&input, "query").trim();
        if query.is_empty() {
            return Ok(ToolOutput::error("Error: query is required."));
        }
        let count = int_arg(&input, "count")
            .unwrap_or(DEFAULT_COUNT)
            .clamp(1, MAX_COUNT);

        let results = match self.search(query, count).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Web search error: {e}");
                return Ok(ToolOutput::error(format!("Search error: {e}")));
            }
        };
        if results.is_empty() {
            return Ok(ToolOutput::ok(format!("No results found for: {query}")));
        }
        let blocks: Vec<String> = results
            .iter()
            .map(|r| format!("**{}**\n{}\n{}", r.title, r.url, r.description))
            .collect();
        Ok(ToolOutput::ok(blocks.join("\n\n")))
    }
}
