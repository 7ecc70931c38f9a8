//! Configuration loading.
//!
//! Settings come from an optional TOML file (default
//! `./config/concierge.toml`) overlaid with environment variables, then
//! validated. Environment variables always win over the file so a
//! deployment can be driven entirely from the environment (or a `.env`
//! file, loaded by the binary at startup).
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `AZURE_OPENAI_ENDPOINT` | `model.endpoint` |
//! | `AZURE_OPENAI_API_KEY` | `model.api_key` |
//! | `AZURE_OPENAI_DEPLOYMENT` | `model.deployment` |
//! | `AZURE_OPENAI_API_VERSION` | `model.api_version` |
//! | `AZURE_OPENAI_PROMPT` | `model.system_prompt` |
//! | `AZURE_SEARCH_ENDPOINT` / `_API_KEY` / `_INDEX` | `search.ai_search` |
//! | `AZURE_SEARCH_ENDPOINT_2` / `_API_KEY_2` / `_INDEX_2` | `search.ai_search_2` |
//! | `GOOGLE_API_KEY` / `GOOGLE_SEARCH_ENGINE_ID` | `web_search` |
//! | `URL_retrieve_data` | `inventory.url` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Vector search indexes, keyed by the tool name the model sees.
    #[serde(default)]
    pub search: BTreeMap<String, SearchIndexConfig>,
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
    #[serde(default)]
    pub inventory: Option<InventoryConfig>,
    #[serde(default)]
    pub plot: PlotConfig,
    #[serde(default)]
    pub inventory_server: InventoryServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Upper bound on tool-call rounds per exchange.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for HTTP 429 / 5xx responses. Zero disables retrying.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            deployment: default_deployment(),
            api_version: default_api_version(),
            system_prompt: default_system_prompt(),
            max_tool_rounds: default_max_tool_rounds(),
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

fn default_deployment() -> String {
    "gpt-4.1".to_string()
}
fn default_api_version() -> String {
    "2025-01-01-preview".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_max_tool_rounds() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    120
}

impl ModelConfig {
    /// Check the settings needed to reach the hosted model.
    ///
    /// Kept separate from [`Config::validate`] because commands such as
    /// `inventory serve` and `tool test` never talk to the model.
    pub fn validate(&self) -> Result<()> {
        match self.endpoint.as_deref() {
            Some(e) if !e.trim().is_empty() => {}
            _ => bail!("model.endpoint is not set (AZURE_OPENAI_ENDPOINT)"),
        }
        match self.api_key.as_deref() {
            Some(k) if !k.trim().is_empty() => {}
            _ => bail!("model.api_key is not set (AZURE_OPENAI_API_KEY)"),
        }
        if self.deployment.trim().is_empty() {
            bail!("model.deployment must not be empty");
        }
        if self.api_version.trim().is_empty() {
            bail!("model.api_version must not be empty");
        }
        if self.timeout_secs == 0 {
            bail!("model.timeout_secs must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// First message shown when a chat-widget session starts.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Sessions idle for this long are dropped. Zero keeps them forever.
    #[serde(default = "default_session_idle_minutes")]
    pub session_idle_minutes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            greeting: default_greeting(),
            session_idle_minutes: default_session_idle_minutes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_greeting() -> String {
    "Hi! Ask me about the Theme Park".to_string()
}
fn default_session_idle_minutes() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchIndexConfig {
    pub endpoint: String,
    pub index: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_search_description")]
    pub description: String,
    /// Document field holding the passage text.
    #[serde(default = "default_content_field")]
    pub content_field: String,
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    #[serde(default = "default_top")]
    pub top: usize,
    #[serde(default = "default_knn")]
    pub k_nearest_neighbors: usize,
    #[serde(default = "default_semantic_configuration")]
    pub semantic_configuration: String,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
}

impl SearchIndexConfig {
    fn from_env_defaults(endpoint: String, index: String) -> Self {
        Self {
            endpoint,
            index,
            api_key: None,
            description: default_search_description(),
            content_field: default_content_field(),
            vector_field: default_vector_field(),
            top: default_top(),
            k_nearest_neighbors: default_knn(),
            semantic_configuration: default_semantic_configuration(),
            api_version: default_search_api_version(),
        }
    }
}

fn default_search_description() -> String {
    "Search the knowledge index for passages relevant to the guest's question.".to_string()
}
fn default_content_field() -> String {
    "chunk".to_string()
}
fn default_vector_field() -> String {
    "vector".to_string()
}
fn default_top() -> usize {
    3
}
fn default_knn() -> usize {
    50
}
fn default_semantic_configuration() -> String {
    "my-semantic-config".to_string()
}
fn default_search_api_version() -> String {
    "2024-07-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSearchConfig {
    pub api_key: String,
    pub engine_id: String,
    #[serde(default = "default_web_search_url")]
    pub base_url: String,
    #[serde(default = "default_num")]
    pub num: u32,
}

fn default_web_search_url() -> String {
    "https://www.googleapis.com/customsearch/v1".to_string()
}
fn default_num() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryConfig {
    pub url: String,
    #[serde(default = "default_inventory_description")]
    pub description: String,
}

fn default_inventory_description() -> String {
    "Retrieve the full shops inventory as a JSON object.".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_plot_width")]
    pub width: u32,
    #[serde(default = "default_plot_height")]
    pub height: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_plot_width(),
            height: default_plot_height(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_plot_width() -> u32 {
    640
}
fn default_plot_height() -> u32 {
    480
}

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryServerConfig {
    #[serde(default = "default_inventory_bind")]
    pub bind: String,
    #[serde(default = "default_inventory_routes")]
    pub routes: Vec<InventoryRoute>,
}

impl Default for InventoryServerConfig {
    fn default() -> Self {
        Self {
            bind: default_inventory_bind(),
            routes: default_inventory_routes(),
        }
    }
}

/// One `GET` route of the inventory server and the JSON file it serves.
#[derive(Debug, Deserialize, Clone)]
pub struct InventoryRoute {
    pub path: String,
    pub file: PathBuf,
}

fn default_inventory_bind() -> String {
    "127.0.0.1:7071".to_string()
}
fn default_inventory_routes() -> Vec<InventoryRoute> {
    vec![
        InventoryRoute {
            path: "/api/seaworld_shops_inventory".to_string(),
            file: PathBuf::from("data/seaworld_shops_inventory.json"),
        },
        InventoryRoute {
            path: "/api/shops_inventory".to_string(),
            file: PathBuf::from("data/shops_inventory.json"),
        },
    ]
}

/// A search index the deployment can configure purely from `AZURE_SEARCH_*`
/// variables carrying `suffix`.
struct EnvSearchIndex {
    suffix: &'static str,
    name: &'static str,
    description: &'static str,
    content_field: &'static str,
    vector_field: &'static str,
}

const ENV_SEARCH_INDEXES: [EnvSearchIndex; 2] = [
    EnvSearchIndex {
        suffix: "",
        name: "ai_search",
        description: "Search the theme park guide for encounters, attractions and \
                      experiences at the park. Use for general questions about the park.",
        content_field: "chunk",
        vector_field: "vector",
    },
    EnvSearchIndex {
        suffix: "_2",
        name: "ai_search_2",
        description: "Search the park map data. Use when the guest asks for directions \
                      around the park or for the location of a specific place.",
        content_field: "text",
        vector_field: "text_vector",
    },
];

impl Config {
    /// Overlay settings from environment variables.
    ///
    /// `var` returns the value of a variable; empty values count as unset.
    /// Taking the lookup as a closure keeps this testable without touching
    /// the process environment.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
            self.model.endpoint = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_API_KEY") {
            self.model.api_key = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT") {
            self.model.deployment = v;
        }
        if let Some(v) = get("AZURE_OPENAI_API_VERSION") {
            self.model.api_version = v;
        }
        if let Some(v) = get("AZURE_OPENAI_PROMPT") {
            self.model.system_prompt = v;
        }

        for env in &ENV_SEARCH_INDEXES {
            let endpoint = get(&format!("AZURE_SEARCH_ENDPOINT{}", env.suffix));
            let api_key = get(&format!("AZURE_SEARCH_API_KEY{}", env.suffix));
            let index = get(&format!("AZURE_SEARCH_INDEX{}", env.suffix));
            let description = get(&format!("AZURE_SEARCH_DESCRIPTION{}", env.suffix));

            if let Some(entry) = self.search.get_mut(env.name) {
                if let Some(v) = endpoint {
                    entry.endpoint = v;
                }
                if let Some(v) = index {
                    entry.index = v;
                }
                if api_key.is_some() {
                    entry.api_key = api_key;
                }
                if let Some(v) = description {
                    entry.description = v;
                }
            } else if let (Some(endpoint), Some(index)) = (endpoint, index) {
                let mut entry = SearchIndexConfig::from_env_defaults(endpoint, index);
                entry.api_key = api_key;
                entry.description = description.unwrap_or_else(|| env.description.to_string());
                entry.content_field = env.content_field.to_string();
                entry.vector_field = env.vector_field.to_string();
                self.search.insert(env.name.to_string(), entry);
            }
        }

        let google_key = get("GOOGLE_API_KEY");
        let google_cx = get("GOOGLE_SEARCH_ENGINE_ID");
        match self.web_search.as_mut() {
            Some(web) => {
                if let Some(v) = google_key {
                    web.api_key = v;
                }
                if let Some(v) = google_cx {
                    web.engine_id = v;
                }
            }
            None => {
                if let (Some(api_key), Some(engine_id)) = (google_key, google_cx) {
                    self.web_search = Some(WebSearchConfig {
                        api_key,
                        engine_id,
                        base_url: default_web_search_url(),
                        num: default_num(),
                    });
                }
            }
        }

        if let Some(url) = get("URL_retrieve_data") {
            match self.inventory.as_mut() {
                Some(inv) => inv.url = url,
                None => {
                    self.inventory = Some(InventoryConfig {
                        url,
                        description: default_inventory_description(),
                    })
                }
            }
        }
    }

    /// Validate tool and server settings. Model settings are checked
    /// separately by [`ModelConfig::validate`].
    pub fn validate(&self) -> Result<()> {
        for (name, index) in &self.search {
            if name.trim().is_empty() {
                bail!("search index names must not be empty");
            }
            if index.endpoint.trim().is_empty() {
                bail!("search.{}.endpoint must not be empty", name);
            }
            if index.index.trim().is_empty() {
                bail!("search.{}.index must not be empty", name);
            }
            match index.api_key.as_deref() {
                Some(k) if !k.trim().is_empty() => {}
                _ => bail!("search.{}.api_key is not set", name),
            }
            if index.content_field.trim().is_empty() {
                bail!("search.{}.content_field must not be empty", name);
            }
            if index.top < 1 {
                bail!("search.{}.top must be >= 1", name);
            }
            if index.k_nearest_neighbors < 1 {
                bail!("search.{}.k_nearest_neighbors must be >= 1", name);
            }
        }

        if let Some(web) = &self.web_search {
            if !(1..=10).contains(&web.num) {
                bail!("web_search.num must be in [1, 10]");
            }
        }

        if let Some(inv) = &self.inventory {
            if inv.url.trim().is_empty() {
                bail!("inventory.url must not be empty");
            }
        }

        if self.plot.width < 128 || self.plot.height < 128 {
            bail!("plot.width and plot.height must be >= 128");
        }

        let mut seen = HashSet::new();
        for route in &self.inventory_server.routes {
            if !route.path.starts_with('/') {
                bail!(
                    "inventory_server route '{}' must start with '/'",
                    route.path
                );
            }
            if !seen.insert(route.path.as_str()) {
                bail!("duplicate inventory_server route: {}", route.path);
            }
        }

        Ok(())
    }
}

/// Load configuration from `path` (if it exists) and the process environment.
pub fn load_config(path: &Path) -> Result<Config> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Like [`load_config`], with an explicit environment lookup.
pub fn load_config_with_env<F>(path: &Path, var: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    config.apply_env(var);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = load_config_with_env(&tmp.path().join("nope.toml"), env(&[])).unwrap();
        assert_eq!(cfg.model.api_version, "2025-01-01-preview");
        assert_eq!(cfg.server.bind, "127.0.0.1:5000");
        assert_eq!(cfg.server.session_idle_minutes, 60);
        assert!(cfg.search.is_empty());
        assert!(cfg.web_search.is_none());
        assert_eq!(cfg.inventory_server.routes.len(), 2);
        assert!(cfg.model.validate().is_err());
    }

    #[test]
    fn test_env_builds_model_and_tools() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "secret"),
            ("AZURE_OPENAI_PROMPT", "You are a park guide."),
            ("AZURE_SEARCH_ENDPOINT", "https://s1.search.windows.net"),
            ("AZURE_SEARCH_API_KEY", "k1"),
            ("AZURE_SEARCH_INDEX", "handbook"),
            ("AZURE_SEARCH_ENDPOINT_2", "https://s2.search.windows.net"),
            ("AZURE_SEARCH_API_KEY_2", "k2"),
            ("AZURE_SEARCH_INDEX_2", "maps"),
            ("GOOGLE_API_KEY", "g"),
            ("GOOGLE_SEARCH_ENGINE_ID", "cx"),
            ("URL_retrieve_data", "http://localhost:7071/api/shops_inventory"),
        ]));
        cfg.validate().unwrap();
        cfg.model.validate().unwrap();

        assert_eq!(cfg.model.system_prompt, "You are a park guide.");
        assert_eq!(cfg.search.len(), 2);
        assert_eq!(cfg.search["ai_search"].content_field, "chunk");
        assert_eq!(cfg.search["ai_search_2"].content_field, "text");
        assert_eq!(cfg.search["ai_search_2"].vector_field, "text_vector");
        assert!(cfg.search["ai_search"].description.contains("general questions"));
        assert!(cfg.search["ai_search_2"].description.contains("directions"));
        assert_eq!(cfg.web_search.as_ref().unwrap().num, 3);
        assert!(cfg.inventory.is_some());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut cfg: Config = toml::from_str(
            r#"
[model]
endpoint = "https://file.openai.azure.com"
deployment = "gpt-4o"

[search.ai_search]
endpoint = "https://file.search.windows.net"
index = "file-index"
api_key = "file-key"
top = 7
"#,
        )
        .unwrap();
        cfg.apply_env(env(&[
            ("AZURE_OPENAI_DEPLOYMENT", "gpt-4.1"),
            ("AZURE_SEARCH_INDEX", "env-index"),
            ("AZURE_OPENAI_ENDPOINT", ""),
        ]));
        assert_eq!(cfg.model.deployment, "gpt-4.1");
        assert_eq!(
            cfg.model.endpoint.as_deref(),
            Some("https://file.openai.azure.com")
        );
        let idx = &cfg.search["ai_search"];
        assert_eq!(idx.index, "env-index");
        assert_eq!(idx.api_key.as_deref(), Some("file-key"));
        assert_eq!(idx.top, 7);
    }

    #[test]
    fn test_env_index_description_override() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("AZURE_SEARCH_ENDPOINT_2", "https://s2.search.windows.net"),
            ("AZURE_SEARCH_API_KEY_2", "k2"),
            ("AZURE_SEARCH_INDEX_2", "handbook"),
            ("AZURE_SEARCH_DESCRIPTION_2", "Search the guest engagement handbook."),
        ]));
        assert_eq!(cfg.search.len(), 1);
        assert_eq!(
            cfg.search["ai_search_2"].description,
            "Search the guest engagement handbook."
        );
    }

    #[test]
    fn test_search_without_key_rejected() {
        let cfg: Config = toml::from_str(
            r#"
[search.docs]
endpoint = "https://s.search.windows.net"
index = "docs"
"#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("search.docs.api_key"), "{}", err);
    }

    #[test]
    fn test_duplicate_inventory_routes_rejected() {
        let cfg: Config = toml::from_str(
            r#"
[inventory_server]
routes = [
  { path = "/api/inventory", file = "a.json" },
  { path = "/api/inventory", file = "b.json" },
]
"#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate"), "{}", err);
    }
}
