//! Chat API server.
//!
//! Serves the conversation engine over JSON HTTP: a single-call `/api`
//! endpoint and the session endpoints used by the chat widget. Each
//! conversation is keyed by a session id; concurrent requests on one
//! session are answered one at a time, different sessions run in parallel.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api` | `{"message", "session_id"?}` → `{"result", "session_id"}` |
//! | `POST` | `/chat/sessions` | Open a widget session, returns the greeting |
//! | `POST` | `/chat/sessions/{id}/messages` | `{"content"}` → `{"messages": [...]}` |
//! | `DELETE` | `/chat/sessions/{id}` | Close a widget session |
//! | `GET`  | `/tools/list` | Registered tool descriptors |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "The 'message' key cannot be empty." }
//! ```
//!
//! `400` for a missing or empty `/api` message or a malformed widget
//! message body, `404` for an unknown widget session, `500` with the error
//! text when the model or a tool fails.
//!
//! # Sessions
//!
//! Sessions idle for `[server].session_idle_minutes` are dropped by a
//! background sweep. A later `/api` call with that id starts a fresh
//! conversation; widget routes answer `404`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the widget can be
//! embedded in any page.

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::engine::ChatEngine;
use crate::session::SessionStore;
use crate::traits::ToolInfo;
use crate::widget::{self, WidgetMessage};

pub const EMPTY_MESSAGE_ERROR: &str = "The 'message' key cannot be empty.";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    engine: Arc<ChatEngine>,
    sessions: Arc<SessionStore>,
    greeting: Arc<str>,
}

/// Build the chat API router around an engine and a session store.
pub fn router(engine: Arc<ChatEngine>, sessions: Arc<SessionStore>, greeting: &str) -> Router {
    let state = AppState {
        engine,
        sessions,
        greeting: Arc::from(greeting),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api", post(handle_api))
        .route("/chat/sessions", post(handle_open_session))
        .route("/chat/sessions/{id}", delete(handle_close_session))
        .route("/chat/sessions/{id}/messages", post(handle_session_message))
        .route("/tools/list", get(handle_list_tools))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the chat API server on `[server].bind`.
///
/// Requires the model settings; the server runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = ChatEngine::from_config(config)?;
    let mut sessions = SessionStore::new(config.model.system_prompt.clone());
    if config.server.session_idle_minutes > 0 {
        let minutes = i64::try_from(config.server.session_idle_minutes).unwrap_or(i64::MAX);
        sessions = sessions.with_idle_timeout(chrono::Duration::minutes(minutes));
    }
    let sessions = Arc::new(sessions);
    spawn_session_sweeper(sessions.clone());
    let app = router(Arc::new(engine), sessions, &config.server.greeting);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("chat server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop idle sessions. A no-op for stores without a timeout.
fn spawn_session_sweeper(sessions: Arc<SessionStore>) {
    let Some(timeout) = sessions.idle_timeout() else {
        return;
    };
    let period = timeout
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
        .clamp(std::time::Duration::from_secs(1), std::time::Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(chrono::Utc::now());
            if evicted > 0 {
                info!(evicted, remaining = sessions.len(), "idle sessions dropped");
            }
        }
    });
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.engine.tools().infos(),
    })
}

// ============ POST /api ============

#[derive(Serialize)]
struct ApiResponse {
    result: String,
    session_id: String,
}

/// Handler for `POST /api`.
///
/// The body is read leniently: anything that is not a JSON object with a
/// non-empty string `message` is a `400`, including malformed JSON.
async fn handle_api(State(state): State<AppState>, body: Bytes) -> Result<Json<ApiResponse>, AppError> {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| bad_request(EMPTY_MESSAGE_ERROR))?;
    let session_id = payload
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());

    let session = state.sessions.get_or_create(session_id);
    let mut history = session.history.lock().await;
    let result = state
        .engine
        .reply(&mut history, message)
        .await
        .map_err(|e| {
            error!(session = %session.id, "exchange failed: {:#}", e);
            internal(e)
        })?;

    Ok(Json(ApiResponse {
        result,
        session_id: session.id.clone(),
    }))
}

// ============ Widget sessions ============

#[derive(Serialize)]
struct SessionOpened {
    session_id: String,
    messages: Vec<WidgetMessage>,
}

#[derive(Serialize)]
struct WidgetReply {
    messages: Vec<WidgetMessage>,
}

#[derive(Default, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    content: String,
}

async fn handle_open_session(State(state): State<AppState>) -> Json<SessionOpened> {
    let (session, greeting) = widget::start_session(&state.sessions, &state.greeting);
    Json(SessionOpened {
        session_id: session.id.clone(),
        messages: vec![greeting],
    })
}

/// Handler for `POST /chat/sessions/{id}/messages`.
///
/// An empty body or a missing `content` is an empty message; anything that
/// is not a JSON object is a `400` with the usual error body.
async fn handle_session_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<WidgetReply>, AppError> {
    let incoming: IncomingMessage = if body.iter().all(u8::is_ascii_whitespace) {
        IncomingMessage::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| bad_request(format!("invalid message body: {}", e)))?
    };
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| not_found(format!("no chat session with id: {}", id)))?;
    let reply = widget::handle_message(&state.engine, &session, &incoming.content).await;
    Ok(Json(WidgetReply {
        messages: vec![reply],
    }))
}

async fn handle_close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if widget::close_session(&state.sessions, &id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no chat session with id: {}", id)))
    }
}
