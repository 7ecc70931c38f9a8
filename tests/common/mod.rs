//! In-process stand-ins for the hosted services.
//!
//! One axum app plays Azure OpenAI, Azure AI Search, Google Custom Search
//! and the inventory endpoint. The fake model is deterministic:
//!
//! - user text `fail` → HTTP 500
//! - user text `search: <q>` with tools offered → a call to `ai_search`
//! - a `tool` message last → `Answer based on: <tool output>`
//! - anything else → `You said: <text>`
//!
//! Requests with `"stream": true` get the same answers as SSE chunks.

#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use concierge::config::{load_config_with_env, Config};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const MODEL_KEY: &str = "model-key";
pub const SEARCH_KEY: &str = "search-key";

#[derive(Clone, Default)]
pub struct Recorded {
    pub model_requests: Arc<Mutex<Vec<Value>>>,
}

impl Recorded {
    pub fn model_requests(&self) -> Vec<Value> {
        self.model_requests.lock().unwrap().clone()
    }
}

/// Serve `app` on an ephemeral port and return its base URL.
pub async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Start the fake services.
pub async fn spawn_services() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/openai/deployments/{deployment}/chat/completions",
            post(completions),
        )
        .route("/indexes/{index}/docs/search", post(search))
        .route("/customsearch/v1", get(google))
        .route("/inventory", get(inventory))
        .with_state(recorded.clone());
    (spawn(app).await, recorded)
}

/// A config pointing every tool and the model at `base`.
pub fn config_for(base: &str, dir: &TempDir) -> Config {
    let toml = format!(
        r#"
[model]
endpoint = "{base}"
api_key = "{MODEL_KEY}"
deployment = "gpt-test"
system_prompt = "You are the park concierge."

[server]
greeting = "Hi! Ask me about the Theme Park"

[search.ai_search]
endpoint = "{base}"
index = "park"
api_key = "{SEARCH_KEY}"

[search.ai_search_broken]
endpoint = "{base}"
index = "broken"
api_key = "{SEARCH_KEY}"

[web_search]
api_key = "g-key"
engine_id = "cx"
base_url = "{base}/customsearch/v1"

[inventory]
url = "{base}/inventory"
"#
    );
    let path = dir.path().join("concierge.toml");
    std::fs::write(&path, toml).unwrap();
    load_config_with_env(&path, |_| None).unwrap()
}

// ============ Azure OpenAI ============

fn text_message(body: &Value) -> (String, String) {
    let last = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .cloned()
        .unwrap_or(Value::Null);
    (
        last["role"].as_str().unwrap_or("").to_string(),
        last["content"].as_str().unwrap_or("").to_string(),
    )
}

enum Answer {
    Text(String),
    Call { name: String, arguments: String },
}

async fn completions(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if headers.get("api-key").and_then(|v| v.to_str().ok()) != Some(MODEL_KEY) {
        return (StatusCode::UNAUTHORIZED, "bad api-key").into_response();
    }
    recorded.model_requests.lock().unwrap().push(body.clone());

    let (role, content) = text_message(&body);
    let tools_offered = body.get("tools").is_some();

    let answer = match role.as_str() {
        "tool" => Answer::Text(format!("Answer based on: {}", content)),
        "user" if content == "fail" => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "deployment overloaded").into_response();
        }
        "user" if tools_offered && content.starts_with("search:") => Answer::Call {
            name: "ai_search".into(),
            arguments: json!({ "query": content["search:".len()..].trim() }).to_string(),
        },
        _ => Answer::Text(format!("You said: {}", content)),
    };

    if body["stream"] == true {
        if content == "split events" {
            return sse_split_events();
        }
        return sse(answer);
    }

    let message = match answer {
        Answer::Text(text) => json!({ "role": "assistant", "content": text }),
        Answer::Call { name, arguments } => json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": name, "arguments": arguments }
            }]
        }),
    };
    Json(json!({ "choices": [{ "index": 0, "message": message, "finish_reason": "stop" }] }))
        .into_response()
}

fn sse(answer: Answer) -> Response {
    let mut chunks = vec![json!({ "choices": [] })];
    match answer {
        Answer::Text(text) => {
            let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
            let (a, b) = text.split_at(mid);
            for part in [a, b] {
                chunks.push(json!({
                    "choices": [{ "index": 0, "delta": { "content": part }, "finish_reason": null }]
                }));
            }
            chunks.push(json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }] }));
        }
        Answer::Call { name, arguments } => {
            let (a, b) = arguments.split_at(arguments.len() / 2);
            chunks.push(json!({
                "choices": [{ "index": 0, "delta": { "role": "assistant", "tool_calls": [{
                    "index": 0, "id": "call_1", "type": "function",
                    "function": { "name": name, "arguments": a }
                }]}, "finish_reason": null }]
            }));
            chunks.push(json!({
                "choices": [{ "index": 0, "delta": { "tool_calls": [{
                    "index": 0, "function": { "arguments": b }
                }]}, "finish_reason": null }]
            }));
            chunks.push(json!({
                "choices": [{ "index": 0, "delta": {}, "finish_reason": "tool_calls" }]
            }));
        }
    }

    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

/// Events spread over several `data:` lines, with CRLF endings, comments
/// and an explicit event name.
fn sse_split_events() -> Response {
    let body = concat!(
        ": keep-alive\r\n\r\n",
        "event: message\r\n",
        "data: {\"choices\": [{\"index\": 0,\r\n",
        "data: \"delta\": {\"content\": \"Split \"}}]}\r\n\r\n",
        "data: {\"choices\": [{\"index\": 0, \"delta\": {\"content\": \"events\"}}]}\r\n\r\n",
        "data: [DONE]\r\n\r\n",
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

// ============ Azure AI Search ============

async fn search(headers: HeaderMap, Path(index): Path<String>, Json(body): Json<Value>) -> Response {
    if headers.get("api-key").and_then(|v| v.to_str().ok()) != Some(SEARCH_KEY) {
        return (StatusCode::FORBIDDEN, "bad api-key").into_response();
    }
    if index == "broken" {
        return (StatusCode::SERVICE_UNAVAILABLE, "index offline").into_response();
    }
    if body["search"] == "nothing" {
        return Json(json!({ "@odata.count": 0, "value": [] })).into_response();
    }
    Json(json!({
        "@odata.count": 2,
        "value": [
            { "@search.score": 2.1, "chunk": "Gate B is next to the lockers." },
            { "@search.score": 1.4, "chunk": "Lockers cost $10 per day." }
        ]
    }))
    .into_response()
}

// ============ Google Custom Search ============

async fn google(Query(q): Query<HashMap<String, String>>) -> Response {
    match q.get("q").map(String::as_str) {
        Some("forbidden") => (StatusCode::FORBIDDEN, "quota exceeded").into_response(),
        Some("nothing") => Json(json!({ "kind": "customsearch#search" })).into_response(),
        _ => Json(json!({
            "items": [
                { "title": "Park hours", "snippet": "Open 9am to 6pm", "link": "https://park.example/hours" },
                { "title": "Tickets", "snippet": "Buy online", "link": "https://park.example/tickets" }
            ]
        }))
        .into_response(),
    }
}

// ============ Inventory ============

async fn inventory() -> Json<Value> {
    Json(json!([
        { "shop": "Gift Shop", "items": [{ "name": "Plush Orca", "qty": 12 }] }
    ]))
}
