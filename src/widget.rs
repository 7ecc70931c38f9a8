//! Chat-widget session adapter.
//!
//! A widget conversation opens with a greeting, then answers each user
//! message with one or more [`WidgetMessage`]s. A reply that is a PNG data
//! URI (the plot tool's output passed through by the model) is rendered as
//! an inline image rather than text.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::ChatEngine;
use crate::plot::PNG_DATA_URI_PREFIX;
use crate::session::{Session, SessionStore};

pub const EMPTY_MESSAGE_REPLY: &str = "Please enter a message.";
pub const NO_RESPONSE_REPLY: &str = "(no response)";
pub const PLOT_CAPTION: &str = "Here is the generated plot:";
pub const PLOT_ELEMENT_NAME: &str = "Financial Plot";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<WidgetElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetElement {
    Image {
        name: String,
        display: String,
        url: String,
    },
}

impl WidgetMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            elements: Vec::new(),
        }
    }
}

/// Turn a model reply into the message the widget displays.
pub fn render_reply(reply: &str) -> WidgetMessage {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        WidgetMessage::text(NO_RESPONSE_REPLY)
    } else if trimmed.starts_with(PNG_DATA_URI_PREFIX) {
        WidgetMessage {
            content: PLOT_CAPTION.to_string(),
            elements: vec![WidgetElement::Image {
                name: PLOT_ELEMENT_NAME.to_string(),
                display: "inline".to_string(),
                url: trimmed.to_string(),
            }],
        }
    } else {
        WidgetMessage::text(reply)
    }
}

/// Open a session and return it with its greeting.
pub fn start_session(store: &SessionStore, greeting: &str) -> (Arc<Session>, WidgetMessage) {
    let session = store.create();
    (session, WidgetMessage::text(greeting))
}

/// Answer one widget message. Surrounding whitespace is dropped before the
/// model sees it. Failures are rendered, never returned.
pub async fn handle_message(engine: &ChatEngine, session: &Session, content: &str) -> WidgetMessage {
    let content = content.trim();
    if content.is_empty() {
        return WidgetMessage::text(EMPTY_MESSAGE_REPLY);
    }

    let mut history = session.history.lock().await;
    match engine.reply(&mut history, content).await {
        Ok(reply) => render_reply(&reply),
        Err(e) => {
            error!(session = %session.id, "widget exchange failed: {:#}", e);
            WidgetMessage::text(format!("Error: {:#}", e))
        }
    }
}

pub fn close_session(store: &SessionStore, id: &str) -> bool {
    let existed = store.remove(id);
    if existed {
        info!(session = id, "widget session closed");
    }
    existed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatModel, Completion};
    use crate::models::Message;
    use crate::traits::{ToolRegistry, ToolSpec};
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl ChatModel for Fixed {
        async fn complete(&self, _: &[Message], _: &[ToolSpec]) -> anyhow::Result<Completion> {
            if self.0.is_empty() {
                anyhow::bail!("deployment not found");
            }
            Ok(Completion::text(self.0))
        }
    }

    fn engine(reply: &'static str) -> ChatEngine {
        ChatEngine::new(Arc::new(Fixed(reply)), Arc::new(ToolRegistry::new()))
    }

    #[test]
    fn test_render_plot_reply_as_image() {
        let uri = format!("{}iVBORw0KGgo=", PNG_DATA_URI_PREFIX);
        let msg = render_reply(&uri);
        assert_eq!(msg.content, "Here is the generated plot:");
        assert_eq!(
            msg.elements,
            vec![WidgetElement::Image {
                name: "Financial Plot".into(),
                display: "inline".into(),
                url: uri.clone(),
            }]
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["elements"][0]["type"], "image");
    }

    #[test]
    fn test_render_text_reply() {
        let msg = render_reply("The park opens at 9.");
        assert_eq!(msg, WidgetMessage::text("The park opens at 9."));
        assert!(serde_json::to_value(&msg).unwrap().get("elements").is_none());
    }

    #[tokio::test]
    async fn test_session_flow() {
        let store = SessionStore::new("sys");
        let (session, greeting) = start_session(&store, "Hi! Ask me about the Theme Park");
        assert_eq!(greeting.content, "Hi! Ask me about the Theme Park");

        let engine = engine("Gates open at 9am.");
        let reply = handle_message(&engine, &session, "  ").await;
        assert_eq!(reply.content, EMPTY_MESSAGE_REPLY);
        assert_eq!(session.history.lock().await.len(), 1);

        let reply = handle_message(&engine, &session, "when do you open?").await;
        assert_eq!(reply.content, "Gates open at 9am.");
        assert_eq!(session.history.lock().await.len(), 3);

        assert!(close_session(&store, &session.id));
        assert!(!close_session(&store, &session.id));
    }

    #[tokio::test]
    async fn test_message_is_trimmed_and_blank_reply_rendered() {
        let store = SessionStore::new("sys");
        let (session, _) = start_session(&store, "hi");

        let reply = handle_message(&engine("   "), &session, "\n  where is gate b?  \n").await;
        assert_eq!(reply.content, NO_RESPONSE_REPLY);

        let history = session.history.lock().await;
        assert_eq!(history.messages()[1].text_content(), "where is gate b?");
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_is_rendered() {
        let store = SessionStore::new("sys");
        let (session, _) = start_session(&store, "hi");
        let reply = handle_message(&engine(""), &session, "hello").await;
        assert_eq!(reply.content, "Error: deployment not found");
    }
}
