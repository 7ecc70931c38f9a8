//! # Concierge
//!
//! A tool-augmented conversational assistant for a theme park and a family
//! of financial funds.
//!
//! Concierge wraps a hosted chat model (Azure OpenAI) with a set of tools the
//! model can call while answering: vector search over Azure AI Search
//! indexes, Google web search, a shop-inventory endpoint and a line-plot
//! renderer. The same engine is served through a terminal loop, a JSON HTTP
//! API and a chat-widget session protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Front-ends  │──▶│  ChatEngine  │──▶│ Azure OpenAI  │
//! │ CLI/API/Chat │   │ (tool loop)  │   └───────────────┘
//! └──────┬───────┘   └──────┬───────┘
//!        │                  ▼
//!   SessionStore     ┌──────────────┐   AI Search · Google ·
//!                    │ ToolRegistry │──▶ inventory · plot
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! concierge chat                  # terminal chat
//! concierge chat --stream         # print replies as they stream
//! concierge serve                 # POST /api + widget sessions
//! concierge inventory serve       # static inventory JSON
//! concierge tool test web_search --param query="park hours"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overlay |
//! | [`models`] | Chat messages and tool calls |
//! | [`history`] | Ordered conversation history |
//! | [`traits`] | `Tool` trait and `ToolRegistry` |
//! | [`search`] | Azure AI Search tool |
//! | [`web_search`] | Google web search tool |
//! | [`inventory`] | Inventory tool and inventory server |
//! | [`plot`] | Line plot tool |
//! | [`llm`] | Chat model client (Azure OpenAI) |
//! | [`engine`] | Function-calling conversation engine |
//! | [`session`] | Per-conversation session store |
//! | [`chat`] | Terminal chat loop |
//! | [`widget`] | Chat-widget session adapter |
//! | [`server`] | Chat API HTTP server |
//! | [`tool_cmd`] | `tool list` / `tool test` commands |

pub mod chat;
pub mod config;
pub mod engine;
pub mod history;
pub mod inventory;
pub mod llm;
pub mod models;
pub mod plot;
pub mod search;
pub mod server;
pub mod session;
pub mod tool_cmd;
pub mod traits;
pub mod web_search;
pub mod widget;
