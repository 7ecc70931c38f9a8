//! Chat-completion client.
//!
//! Defines the [`ChatModel`] trait the engine talks to and
//! [`AzureOpenAi`], its implementation for Azure OpenAI deployments:
//!
//! ```text
//! POST {endpoint}/openai/deployments/{deployment}/chat/completions?api-version=...
//! api-key: <key>
//! ```
//!
//! Streaming requests are read as server-sent events; text deltas are
//! forwarded to a callback as they arrive and tool-call fragments are
//! stitched back together by index.
//!
//! # Retry Strategy
//!
//! Off by default (`model.max_retries = 0`). When enabled:
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, … capped at 32s)
//! - other 4xx → fail immediately
//! - network errors → retry

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::models::{Message, ToolCall};
use crate::traits::ToolSpec;

/// One model turn: final text, or tool calls to run first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }
}

/// A hosted chat model that can call tools.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Request one completion for `messages`, offering `tools`.
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Completion>;

    /// Like [`complete`](ChatModel::complete), forwarding text deltas to
    /// `on_delta` as they arrive.
    ///
    /// The default implementation emits the whole text as one delta.
    async fn complete_streaming(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Completion> {
        let completion = self.complete(messages, tools).await?;
        if let Some(text) = completion.content.as_deref() {
            if !text.is_empty() {
                on_delta(text);
            }
        }
        Ok(completion)
    }
}

// ============ Azure OpenAI ============

pub struct AzureOpenAi {
    http: reqwest::Client,
    url: String,
    api_version: String,
    api_key: String,
    max_retries: u32,
}

impl AzureOpenAi {
    /// Build a client from validated model settings.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint.as_deref().unwrap_or_default();
        let api_key = config.api_key.clone().unwrap_or_default();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: format!(
                "{}/openai/deployments/{}/chat/completions",
                endpoint.trim_end_matches('/'),
                config.deployment
            ),
            api_version: config.api_version.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    fn request_body(messages: &[Message], tools: &[ToolSpec], stream: bool) -> Value {
        let mut body = json!({
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// POST the request, retrying 429/5xx and network errors up to `max_retries`.
    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.url)
                .query(&[("api-version", self.api_version.as_str())])
                .header("api-key", &self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "chat completion failed, retryable");
                        last_err = Some(anyhow::anyhow!(
                            "Azure OpenAI error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }
                    bail!("Azure OpenAI error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "chat completion request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("chat completion failed after retries")))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

fn parse_completion(response: ChatResponse) -> Result<Completion> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("model returned no choices"))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        bail!("the response was blocked by the content filter");
    }

    Ok(Completion {
        content: choice.message.content,
        tool_calls: choice.message.tool_calls.unwrap_or_default(),
    })
}

#[async_trait]
impl ChatModel for AzureOpenAi {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Completion> {
        let body = Self::request_body(messages, tools, false);
        let response = self.send(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .context("invalid chat completion response")?;
        parse_completion(parsed)
    }

    async fn complete_streaming(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Completion> {
        let body = Self::request_body(messages, tools, true);
        let response = self.send(&body).await?;

        let mut acc = StreamAccumulator::default();
        let mut events = response.bytes_stream().eventsource();

        while let Some(event) = events.next().await {
            let event =
                event.map_err(|e| anyhow::anyhow!("chat completion stream interrupted: {}", e))?;
            if event.data == "[DONE]" {
                return acc.finish();
            }
            if event.data.trim().is_empty() {
                continue;
            }
            let parsed: StreamChunk = serde_json::from_str(&event.data)
                .with_context(|| format!("invalid stream chunk: {}", event.data))?;
            acc.apply(parsed, on_delta)?;
        }

        debug!("stream ended without [DONE]");
        acc.finish()
    }
}

// ============ Streaming ============

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Rebuilds a [`Completion`] from streamed deltas.
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    calls: BTreeMap<usize, PartialCall>,
}

impl StreamAccumulator {
    fn apply(
        &mut self,
        chunk: StreamChunk,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()> {
        // Azure sends a leading chunk with `choices: []` carrying filter results.
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(());
        };

        if choice.finish_reason.as_deref() == Some("content_filter") {
            bail!("the response was blocked by the content filter");
        }

        let delta = choice.delta.unwrap_or_default();
        if let Some(text) = delta.content {
            if !text.is_empty() {
                on_delta(&text);
                self.content.push_str(&text);
            }
        }

        for delta in delta.tool_calls.unwrap_or_default() {
            let call = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                call.id = id;
            }
            if let Some(f) = delta.function {
                if let Some(name) = f.name {
                    call.name.push_str(&name);
                }
                if let Some(args) = f.arguments {
                    call.arguments.push_str(&args);
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Completion> {
        let mut tool_calls = Vec::with_capacity(self.calls.len());
        for (index, call) in self.calls {
            if call.name.is_empty() {
                bail!("streamed tool call {} has no function name", index);
            }
            tool_calls.push(ToolCall::new(call.id, call.name, call.arguments));
        }
        Ok(Completion {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            tool_calls,
        })
    }
}
