//! Shop inventory: the fetch tool and the static JSON server it reads from.
//!
//! The server side exposes one `GET` route per configured JSON file. Each
//! request re-reads the file, so edits show up without a restart. Bodies
//! are re-serialized with two-space indentation.
//!
//! | Method | Path (default) | File |
//! |--------|----------------|------|
//! | `GET` | `/api/seaworld_shops_inventory` | `data/seaworld_shops_inventory.json` |
//! | `GET` | `/api/shops_inventory` | `data/shops_inventory.json` |
//!
//! Read or parse failures answer `500` with a plain-text message.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::{Config, InventoryConfig, InventoryRoute};
use crate::traits::{Tool, ToolContext, ToolKind};

// ═══════════════════════════════════════════════════════════════════════
// Tool
// ═══════════════════════════════════════════════════════════════════════

/// Fetches the whole inventory document from the inventory endpoint.
pub struct InventoryTool {
    config: InventoryConfig,
}

impl InventoryTool {
    pub fn new(config: InventoryConfig) -> Self {
        Self { config }
    }

    pub async fn fetch(&self, http: &reqwest::Client) -> Result<Value> {
        let response = http
            .get(&self.config.url)
            .send()
            .await
            .with_context(|| format!("inventory request to {} failed", self.config.url))?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Tool for InventoryTool {
    fn name(&self) -> &str {
        "get_inventory"
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Inventory
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        self.fetch(ctx.http()).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Server
// ═══════════════════════════════════════════════════════════════════════

/// Read a JSON file and return it pretty-printed.
pub async fn load_inventory(path: &Path) -> Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let data: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(serde_json::to_string_pretty(&data)?)
}

async fn serve_inventory(path: PathBuf) -> Response {
    info!(file = %path.display(), "serving inventory JSON data");
    match load_inventory(&path).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(file = %path.display(), "error loading JSON: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error loading inventory data: {:#}", e),
            )
                .into_response()
        }
    }
}

/// Build a router with one `GET` route per configured file.
pub fn inventory_router(routes: &[InventoryRoute]) -> Router {
    let mut router = Router::new();
    for route in routes {
        let file = route.file.clone();
        router = router.route(
            &route.path,
            get(move || {
                let file = file.clone();
                async move { serve_inventory(file).await }
            }),
        );
    }
    router
}

/// Start the inventory server on `[inventory_server].bind`.
pub async fn run_inventory_server(config: &Config) -> Result<()> {
    let bind_addr = &config.inventory_server.bind;
    let app = inventory_router(&config.inventory_server.routes);

    for route in &config.inventory_server.routes {
        info!("  GET {} -> {}", route.path, route.file.display());
    }

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("inventory server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
