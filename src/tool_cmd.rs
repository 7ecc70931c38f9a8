//! `concierge tool list` / `concierge tool test`.
//!
//! Lets an operator check a tool's configuration and output without going
//! through the model.

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;

use crate::config::Config;
use crate::traits::{result_to_text, ToolContext, ToolRegistry};

/// Print every configured tool.
pub fn list_tools(config: &Config) -> Result<()> {
    let registry = ToolRegistry::from_config(config)?;
    write_tool_list(&registry, &mut std::io::stdout())
}

fn write_tool_list<W: Write>(registry: &ToolRegistry, out: &mut W) -> Result<()> {
    if registry.is_empty() {
        writeln!(out, "No tools configured.")?;
        return Ok(());
    }

    writeln!(out, "{:<24} {:<12} DESCRIPTION", "TOOL", "KIND")?;
    for t in registry.tools() {
        writeln!(out, "{:<24} {:<12} {}", t.name(), t.kind(), t.description())?;
    }
    Ok(())
}

/// Build call arguments from `key=value` pairs. Values that parse as JSON
/// (numbers, arrays, booleans) are used as such, anything else is a string.
pub fn params_from_pairs(pairs: &[(String, String)]) -> Value {
    let mut params = serde_json::Map::new();
    for (k, v) in pairs {
        let value = serde_json::from_str::<Value>(v).unwrap_or_else(|_| Value::String(v.clone()));
        params.insert(k.clone(), value);
    }
    Value::Object(params)
}

/// Invoke one tool with the given arguments and print its result.
pub async fn test_tool(config: &Config, name: &str, pairs: &[(String, String)]) -> Result<()> {
    let registry = ToolRegistry::from_config(config)?;
    let tool = registry
        .find(name)
        .with_context(|| format!("no tool named '{}' is configured", name))?;

    println!("Testing tool: {} ({})", tool.name(), tool.kind());

    let result = registry
        .call(name, params_from_pairs(pairs), &ToolContext::default())
        .await?;

    println!("Result:");
    for line in result_to_text(&result).lines() {
        println!("  {}", line);
    }
    Ok(())
}
