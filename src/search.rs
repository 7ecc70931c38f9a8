//! Vector search index tool (Azure AI Search).
//!
//! Each configured `[search.<name>]` index becomes one tool. A call runs a
//! hybrid query against the index: keyword search over the content field,
//! a vectorizable text query over the vector field, and semantic
//! re-ranking. The top-K passages are joined with newlines.
//!
//! ```text
//! POST {endpoint}/indexes/{index}/docs/search?api-version=2024-07-01
//! api-key: <key>
//!
//! { "search": "...", "vectorQueries": [{ "kind": "text", ... }],
//!   "queryType": "semantic", "top": 3, "count": true, ... }
//! ```
//!
//! Transport and service errors propagate to the caller.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SearchIndexConfig;
use crate::traits::{query_schema, Tool, ToolContext, ToolKind};

/// Returned when the index has no matching passages.
pub const NO_DOCUMENTS: &str = "No documents found.";

pub struct AiSearchTool {
    name: String,
    api_key: String,
    config: SearchIndexConfig,
}

impl AiSearchTool {
    pub fn new(name: String, config: SearchIndexConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("search.{}.api_key is not set", name))?;
        Ok(Self {
            name,
            api_key,
            config,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index
        )
    }

    fn request_body(&self, query: &str) -> Value {
        json!({
            "search": query,
            "vectorQueries": [{
                "kind": "text",
                "text": query,
                "k": self.config.k_nearest_neighbors,
                "fields": self.config.vector_field,
            }],
            "queryType": "semantic",
            "semanticConfiguration": self.config.semantic_configuration,
            "searchFields": self.config.content_field,
            "top": self.config.top,
            "count": true,
        })
    }

    /// Run the query and return the joined passages.
    pub async fn search(&self, http: &reqwest::Client, query: &str) -> Result<String> {
        let response = http
            .post(self.url())
            .query(&[("api-version", self.config.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&self.request_body(query))
            .send()
            .await
            .with_context(|| format!("search request to index '{}' failed", self.config.index))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Azure AI Search error {}: {}", status, body);
        }

        let json: Value = response.json().await?;
        let passages = extract_passages(&json, &self.config.content_field)?;
        Ok(join_passages(&passages))
    }
}

/// Pull the content field out of every hit in a search response.
///
/// Hits without the field (or with a non-string value) are skipped.
fn extract_passages(json: &Value, field: &str) -> Result<Vec<String>> {
    let hits = json
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid search response: missing value array"))?;

    Ok(hits
        .iter()
        .filter_map(|hit| hit.get(field).and_then(|t| t.as_str()))
        .map(|t| t.to_string())
        .collect())
}

fn join_passages(passages: &[String]) -> String {
    if passages.is_empty() {
        NO_DOCUMENTS.to_string()
    } else {
        passages.join("\n")
    }
}

#[async_trait]
impl Tool for AiSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::AiSearch
    }

    fn parameters_schema(&self) -> Value {
        query_schema("Search query")
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        let text = self.search(ctx.http(), query).await?;
        Ok(Value::String(text))
    }
}
