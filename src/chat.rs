//! Interactive terminal chat.
//!
//! ```text
//! Welcome to the chat bot!
//!   Type 'exit' to exit.
//! User:> when does the park open?
//! Agent :> The park opens at 9am.
//! ```

use anyhow::Result;
use std::io::{BufRead, Write};
use tracing::{error, warn};

use crate::config::Config;
use crate::engine::ChatEngine;
use crate::history::ChatHistory;

pub const BANNER: &str = "Welcome to the chat bot!\n  Type 'exit' to exit.";

/// Run the read-answer loop until `exit` or end of input.
///
/// A failed exchange is reported and the loop carries on with the history
/// as it was before that message. With `stream`, any text the model sends
/// before calling a tool is printed too, ahead of the answer.
pub async fn chat_loop<R, W>(
    engine: &ChatEngine,
    history: &mut ChatHistory,
    mut input: R,
    out: &mut W,
    stream: bool,
) -> Result<()>
where
    R: BufRead,
    W: Write + Send,
{
    writeln!(out, "{}", BANNER)?;

    loop {
        write!(out, "User:> ")?;
        out.flush()?;

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => {
                writeln!(out)?;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "stopped reading input");
                writeln!(out)?;
                break;
            }
        }

        let text = line.trim();
        if text.eq_ignore_ascii_case("exit") {
            break;
        }
        if text.is_empty() {
            warn!("empty input, skipping");
            continue;
        }

        let outcome = if stream {
            write!(out, "Agent :> ")?;
            out.flush()?;
            let result = {
                let mut on_delta = |delta: &str| {
                    let _ = write!(out, "{}", delta);
                    let _ = out.flush();
                };
                engine.reply_streaming(history, text, &mut on_delta).await
            };
            writeln!(out)?;
            result
        } else {
            engine.reply(history, text).await.and_then(|reply| {
                writeln!(out, "Agent :> {}", reply)?;
                Ok(reply)
            })
        };

        if let Err(e) = outcome {
            error!("exchange failed: {:#}", e);
            writeln!(out, "Error: {:#}", e)?;
        }
    }

    Ok(())
}

/// `concierge chat`: talk to the engine on stdin/stdout.
pub async fn run_chat(config: &Config, stream: bool) -> Result<()> {
    let engine = ChatEngine::from_config(config)?;
    let mut history = ChatHistory::with_system_prompt(config.model.system_prompt.clone());
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    chat_loop(&engine, &mut history, stdin.lock(), &mut stdout, stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatModel, Completion};
    use crate::models::Message;
    use crate::traits::{ToolRegistry, ToolSpec};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for Counting {
        async fn complete(&self, messages: &[Message], _: &[ToolSpec]) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let last = messages.last().map(|m| m.text_content()).unwrap_or_default();
            if last == "fail" {
                anyhow::bail!("model unavailable");
            }
            Ok(Completion::text(format!("echo: {}", last)))
        }
    }

    async fn run(input: &str, stream: bool) -> (String, usize, ChatHistory) {
        let model = Arc::new(Counting::default());
        let engine = ChatEngine::new(model.clone(), Arc::new(ToolRegistry::new()));
        let mut history = ChatHistory::with_system_prompt("sys");
        let mut out = Vec::new();
        chat_loop(&engine, &mut history, input.as_bytes(), &mut out, stream)
            .await
            .unwrap();
        (
            String::from_utf8(out).unwrap(),
            model.calls.load(Ordering::SeqCst),
            history,
        )
    }

    #[tokio::test]
    async fn test_exit_without_model_call() {
        let (out, calls, history) = run("  EXIT  \nhello\n", false).await;
        assert!(out.starts_with(BANNER));
        assert_eq!(calls, 0);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_reply_and_skip_empty() {
        let (out, calls, history) = run("\nhello\nexit\n", false).await;
        assert_eq!(calls, 1);
        assert!(out.contains("Agent :> echo: hello\n"));
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_eof_ends_loop_and_errors_continue() {
        let (out, calls, history) = run("fail\nhello", true).await;
        assert_eq!(calls, 2);
        assert!(out.contains("Error: model unavailable"));
        assert!(out.contains("Agent :> echo: hello\n"));
        assert_eq!(history.len(), 3);
    }
}
