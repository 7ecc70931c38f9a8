//! Public web search tool (Google Programmable Search Engine).
//!
//! Unlike the other tools this one never fails: any transport, status or
//! decoding error is returned to the model as text starting with
//! [`ERROR_PREFIX`], the same way a search result would be.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::config::WebSearchConfig;
use crate::traits::{query_schema, Tool, ToolContext, ToolKind};

pub const NO_RESULTS: &str = "No search results found.";
pub const ERROR_PREFIX: &str = "Error during Google web search:";

const DESCRIPTION: &str =
    "Search the public internet using Google Search API to retrieve recent or real-time information.";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

pub struct WebSearchTool {
    config: WebSearchConfig,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Self {
        Self { config }
    }

    /// Search and format results; errors become text.
    pub async fn search(&self, http: &reqwest::Client, query: &str) -> String {
        match self.try_search(http, query).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "web search failed");
                format!("{} {}", ERROR_PREFIX, e)
            }
        }
    }

    async fn try_search(&self, http: &reqwest::Client, query: &str) -> Result<String> {
        let num = self.config.num.to_string();
        let response = http
            .get(&self.config.base_url)
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("cx", self.config.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("HTTP {}: {}", status, body);
        }

        let data: SearchResponse = response.json().await?;
        Ok(format_items(&data.items))
    }
}

fn format_items(items: &[SearchItem]) -> String {
    if items.is_empty() {
        return NO_RESULTS.to_string();
    }
    items
        .iter()
        .map(|item| format!("{}\n{}\n{}", item.title, item.snippet, item.link))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    fn parameters_schema(&self) -> Value {
        query_schema("Web search query")
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        Ok(Value::String(self.search(ctx.http(), query).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> WebSearchConfig {
        WebSearchConfig {
            api_key: "key".into(),
            engine_id: "cx".into(),
            base_url: base_url.into(),
            num: 3,
        }
    }

    #[test]
    fn test_format_items() {
        let data: SearchResponse = serde_json::from_value(serde_json::json!({
            "items": [
                { "title": "Park hours", "snippet": "Open daily", "link": "https://a.example" },
                { "title": "Tickets", "link": "https://b.example" }
            ]
        }))
        .unwrap();
        assert_eq!(
            format_items(&data.items),
            "Park hours\nOpen daily\nhttps://a.example\n\n---\n\nTickets\n\nhttps://b.example"
        );

        let empty: SearchResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(format_items(&empty.items), NO_RESULTS);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_returns_error_text() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{}/customsearch/v1", port);
        let tool = WebSearchTool::new(config(&url));
        let out = tool.search(&reqwest::Client::new(), "weather").await;
        assert!(out.starts_with(ERROR_PREFIX), "{}", out);
    }

    #[tokio::test]
    async fn test_malformed_url_returns_error_text() {
        let tool = WebSearchTool::new(config("not a url"));
        let out = tool
            .execute(
                serde_json::json!({ "query": "weather" }),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(out.as_str().unwrap().contains(ERROR_PREFIX));
    }
}
