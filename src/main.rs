//! # Concierge CLI (`concierge`)
//!
//! ## Usage
//!
//! ```bash
//! concierge --config ./config/concierge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `concierge chat [--stream]` | Interactive terminal chat |
//! | `concierge serve` | Chat API and widget session server |
//! | `concierge inventory serve` | Static inventory JSON server |
//! | `concierge tool list` | List configured tools |
//! | `concierge tool test <name> --param k=v` | Invoke one tool directly |
//!
//! Settings come from the optional TOML file, then from the environment
//! (`AZURE_OPENAI_*`, `AZURE_SEARCH_*`, `GOOGLE_*`, `URL_retrieve_data`).
//! A `.env` file in the working directory is loaded first.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use concierge::{chat, config, inventory, server, tool_cmd};

/// Concierge: a tool-augmented chat assistant for the theme park and
/// fund documents.
#[derive(Parser)]
#[command(name = "concierge", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/concierge.toml`. The file is optional; without
    /// it every setting comes from the environment.
    #[arg(long, global = true, default_value = "./config/concierge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant in the terminal.
    ///
    /// Type `exit` to leave.
    Chat {
        /// Print the reply as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Start the chat API server.
    ///
    /// Binds to `[server].bind` and serves `POST /api` plus the chat
    /// widget session endpoints.
    Serve,

    /// Inventory data commands.
    Inventory {
        #[command(subcommand)]
        action: InventoryAction,
    },

    /// Inspect and exercise the configured tools.
    Tool {
        #[command(subcommand)]
        action: ToolAction,
    },
}

#[derive(Subcommand)]
enum InventoryAction {
    /// Serve the inventory JSON files over HTTP.
    Serve,
}

/// Tool subcommands.
#[derive(Subcommand)]
enum ToolAction {
    /// List all configured tools.
    List,
    /// Call one tool with sample parameters and print the result.
    Test {
        /// Tool name as the model sees it (e.g. `web_search`).
        name: String,
        /// Tool parameters as `key=value` pairs.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

/// Parse a `key=value` pair for `--param` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Chat { stream } => {
            chat::run_chat(&cfg, stream).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Inventory { action } => match action {
            InventoryAction::Serve => {
                inventory::run_inventory_server(&cfg).await?;
            }
        },
        Commands::Tool { action } => match action {
            ToolAction::List => {
                tool_cmd::list_tools(&cfg)?;
            }
            ToolAction::Test { name, params } => {
                tool_cmd::test_tool(&cfg, &name, &params).await?;
            }
        },
    }

    Ok(())
}
