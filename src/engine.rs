//! Conversation engine: the function-calling loop.
//!
//! One exchange takes a user message through as many model/tool rounds as
//! the model asks for, then records the final answer:
//!
//! ```text
//! history + user ──▶ model ──▶ tool calls? ──yes──▶ run tools ──▶ model ...
//!                                  │
//!                                  no
//!                                  ▼
//!                        history + assistant answer
//! ```
//!
//! Tool calls and tool results live only in the exchange's working
//! transcript. A successful exchange appends exactly one user and one
//! assistant message to the history; a failed one leaves it untouched.
//!
//! Errors are split the way a model can act on them: an unknown tool name or
//! malformed arguments go back to the model as the tool result, while an
//! error raised by a running tool aborts the exchange.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::history::ChatHistory;
use crate::llm::{AzureOpenAi, ChatModel};
use crate::models::{Message, ToolCall};
use crate::traits::{result_to_text, validate_params, ToolContext, ToolRegistry, ToolSpec};

pub struct ChatEngine {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    max_tool_rounds: usize,
}

impl ChatEngine {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            ctx: ToolContext::default(),
            max_tool_rounds: 5,
        }
    }

    /// Build the engine for `config`: Azure OpenAI plus every configured tool.
    pub fn from_config(config: &Config) -> Result<Self> {
        let model = AzureOpenAi::new(&config.model)?;
        let tools = ToolRegistry::from_config(config)?;
        info!(
            deployment = %config.model.deployment,
            tools = tools.len(),
            "chat engine ready"
        );
        for t in tools.tools() {
            info!("  tool {} ({})", t.name(), t.kind());
        }
        Ok(Self::new(Arc::new(model), Arc::new(tools))
            .with_max_tool_rounds(config.model.max_tool_rounds))
    }

    pub fn with_tool_context(mut self, ctx: ToolContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one exchange and return the assistant's answer.
    pub async fn reply(&self, history: &mut ChatHistory, user_text: &str) -> Result<String> {
        self.exchange(history, user_text, None).await
    }

    /// Run one exchange, forwarding model text to `on_delta` as it streams.
    ///
    /// Text the model sends alongside tool calls (a preamble such as "Let me
    /// check.") is forwarded too, but only the final answer is recorded in
    /// the history.
    pub async fn reply_streaming(
        &self,
        history: &mut ChatHistory,
        user_text: &str,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String> {
        self.exchange(history, user_text, Some(on_delta)).await
    }

    /// The history is only written once the answer is in, so an exchange
    /// that fails or is dropped mid-flight leaves it as it was.
    async fn exchange(
        &self,
        history: &mut ChatHistory,
        user_text: &str,
        on_delta: Option<&mut (dyn for<'a> FnMut(&'a str) + Send)>,
    ) -> Result<String> {
        let user = Message::user(user_text);
        let answer = self.run_rounds(history.messages(), &user, on_delta).await?;
        history.push(user);
        history.add_assistant_message(answer.clone());
        Ok(answer)
    }

    async fn run_rounds(
        &self,
        base: &[Message],
        user: &Message,
        mut on_delta: Option<&mut (dyn for<'a> FnMut(&'a str) + Send)>,
    ) -> Result<String> {
        let mut transcript = base.to_vec();
        transcript.push(user.clone());
        let specs = self.tools.specs();

        for round in 0..=self.max_tool_rounds {
            // The last round withholds tools so the model has to answer.
            let offered: &[ToolSpec] = if round < self.max_tool_rounds {
                &specs
            } else {
                &[]
            };

            let completion = match on_delta.as_deref_mut() {
                Some(cb) => {
                    self.model
                        .complete_streaming(&transcript, offered, cb)
                        .await?
                }
                None => self.model.complete(&transcript, offered).await?,
            };

            if completion.tool_calls.is_empty() {
                return Ok(completion.content.unwrap_or_default());
            }
            if round == self.max_tool_rounds {
                break;
            }

            let calls = completion.tool_calls.clone();
            transcript.push(Message::assistant_tool_calls(
                completion.content,
                completion.tool_calls,
            ));
            for call in &calls {
                let output = self.invoke(call).await?;
                transcript.push(Message::tool_result(call.id.clone(), output));
            }
        }

        bail!(
            "model kept requesting tools after {} rounds",
            self.max_tool_rounds
        )
    }

    /// Execute one tool call and return the text fed back to the model.
    async fn invoke(&self, call: &ToolCall) -> Result<String> {
        let name = call.function.name.as_str();

        let Some(tool) = self.tools.find(name) else {
            warn!(tool = name, "model requested an unknown tool");
            return Ok(format!("Error: no tool named '{}' is available.", name));
        };

        let raw = call.function.arguments.trim();
        let args: Value = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tool = name, error = %e, "unparseable tool arguments");
                    return Ok(format!("Error: invalid JSON arguments for '{}': {}", name, e));
                }
            }
        };

        let params = match validate_params(&tool.parameters_schema(), &args) {
            Ok(p) => p,
            Err(e) => {
                warn!(tool = name, error = %e, "invalid tool arguments");
                return Ok(format!("Error: {}", e));
            }
        };

        info!(tool = name, arguments = %raw, "calling tool");
        let value = tool
            .execute(params, &self.ctx)
            .await
            .with_context(|| format!("tool '{}' failed", name))?;
        let text = result_to_text(&value);
        info!(tool = name, bytes = text.len(), "tool returned");
        Ok(text)
    }
}
