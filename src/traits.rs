//! Tool trait and registry.
//!
//! A tool is a named, described callable with a JSON Schema for its
//! parameters. The model sees the registry as a list of function
//! descriptors and picks tools by name; the engine looks the name up here
//! and executes the tool.
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                    ToolRegistry                    │
//! │  ┌───────────┐ ┌──────────┐ ┌──────────┐ ┌──────┐  │
//! │  │ ai_search │ │web_search│ │inventory │ │ plot │  │
//! │  │  (× N)    │ │          │ │          │ │      │  │
//! │  └───────────┘ └──────────┘ └──────────┘ └──────┘  │
//! └──────────────────────┬─────────────────────────────┘
//!                        ▼
//!            ChatEngine (function-calling loop)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use concierge::traits::ToolRegistry;
//!
//! let mut tools = ToolRegistry::new();
//! // tools.register(Box::new(MyTool::new()))?;
//! assert!(tools.is_empty());
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::config::Config;
use crate::inventory::InventoryTool;
use crate::plot::FundPlotTool;
use crate::search::AiSearchTool;
use crate::web_search::WebSearchTool;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// The families of tools the assistant can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Semantic + vector query against a search index.
    AiSearch,
    /// Public web search.
    WebSearch,
    /// Static inventory document fetched over HTTP.
    Inventory,
    /// Line plot rendered to a PNG data URI.
    Plot,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::AiSearch => "ai_search",
            ToolKind::WebSearch => "web_search",
            ToolKind::Inventory => "inventory",
            ToolKind::Plot => "plot",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool the model can discover and call.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use concierge::traits::{Tool, ToolContext, ToolKind};
///
/// pub struct ParkHoursTool;
///
/// #[async_trait]
/// impl Tool for ParkHoursTool {
///     fn name(&self) -> &str { "park_hours" }
///     fn description(&self) -> &str { "Today's opening hours" }
///     fn kind(&self) -> ToolKind { ToolKind::Inventory }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {} })
///     }
///
///     async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
///         Ok(json!("10:00-18:00"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool. Lowercase with underscores.
    fn name(&self) -> &str;

    /// One-line description; the model reads this to decide when to call.
    fn description(&self) -> &str;

    fn kind(&self) -> ToolKind;

    /// JSON Schema (`type: "object"`) for the call arguments.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with validated arguments.
    ///
    /// Errors returned here abort the whole exchange.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Resources shared by every tool invocation.
#[derive(Clone, Default)]
pub struct ToolContext {
    http: reqwest::Client,
}

impl ToolContext {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Shared outbound HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Descriptors
// ═══════════════════════════════════════════════════════════════════════

/// Serializable tool info for `GET /tools/list` and `concierge tool list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    pub parameters: Value,
}

/// Function descriptor in the chat-completions `tools` array.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub spec_type: &'static str,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Tools available to one engine, looked up by name.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Build the registry for every tool configured in `config`.
    ///
    /// Search indexes come first (in name order), then web search,
    /// inventory and the plot tool.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();

        for (name, index) in &config.search {
            registry.register(Box::new(AiSearchTool::new(name.clone(), index.clone())?))?;
        }
        if let Some(web) = &config.web_search {
            registry.register(Box::new(WebSearchTool::new(web.clone())))?;
        }
        if let Some(inv) = &config.inventory {
            registry.register(Box::new(InventoryTool::new(inv.clone())))?;
        }
        if config.plot.enabled {
            registry.register(Box::new(FundPlotTool::new(config.plot.clone())))?;
        }

        Ok(registry)
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<()> {
        if self.find(tool.name()).is_some() {
            bail!("a tool named '{}' is already registered", tool.name());
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                kind: t.kind(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Descriptors sent to the model with each completion request.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                spec_type: "function",
                function: FunctionSpec {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect()
    }

    /// Look up, validate and execute a tool in one step.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .find(name)
            .ok_or_else(|| anyhow::anyhow!("no tool registered with name: {}", name))?;
        let params = validate_params(&tool.parameters_schema(), &params)?;
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a tool result as the text the model receives.
pub fn result_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter Validation
// ═══════════════════════════════════════════════════════════════════════

/// Validate call arguments against a tool's schema.
///
/// Checks that required fields are present and that top-level values have
/// the declared JSON type. `null` counts as an empty object.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let args = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("arguments must be a JSON object, got {}", json_type_name(other)),
    };

    let required = schema.get("required").and_then(|r| r.as_array());
    for name in required.into_iter().flatten().filter_map(|v| v.as_str()) {
        if !args.contains_key(name) {
            bail!("missing required parameter: {}", name);
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());
    for (name, prop) in properties.into_iter().flatten() {
        let (Some(value), Some(expected)) =
            (args.get(name), prop.get("type").and_then(|t| t.as_str()))
        else {
            continue;
        };
        let type_ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !type_ok {
            bail!(
                "parameter '{}' must be of type '{}', got {}",
                name,
                expected,
                json_type_name(value)
            );
        }
    }

    Ok(Value::Object(args))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schema shared by the tools that take a single free-text query.
pub(crate) fn query_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": description }
        },
        "required": ["query"]
    })
}
