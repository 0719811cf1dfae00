//! Line protocol streamed to the chat client.
//!
//! Every event becomes one line: `0:<json string>` for visible text and
//! `e:<json object>` for the terminal error or stop event.

use std::pin::Pin;

use atlas_llm::Usage;
use futures::Stream;
use serde::Serialize;

pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    /// Text the client appends to the visible transcript.
    TextDelta(String),
    /// Terminal failure.
    Error { message: String },
    /// Terminal success; always the last event of a successful stream.
    Done { usage: TokenUsage },
}

impl ChatEvent {
    pub fn text(text: impl Into<String>) -> Self {
        ChatEvent::TextDelta(text.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        ChatEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChatEvent::TextDelta(_))
    }
}

/// Token counts of the last completed turn, `None` when unreported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl From<&Usage> for TokenUsage {
    fn from(usage: &Usage) -> Self {
        if !usage.is_reported() {
            return TokenUsage::default();
        }
        TokenUsage {
            prompt_tokens: Some(usage.input_tokens),
            completion_tokens: Some(usage.output_tokens),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorLine<'a> {
    finish_reason: &'static str,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StopLine<'a> {
    finish_reason: &'static str,
    usage: &'a TokenUsage,
    is_continued: bool,
}

/// Render one event as a newline-terminated protocol line.
pub fn encode_event(event: &ChatEvent) -> Result<String, serde_json::Error> {
    let line = match event {
        ChatEvent::TextDelta(text) => format!("0:{}\n", serde_json::to_string(text)?),
        ChatEvent::Error { message } => format!(
            "e:{}\n",
            serde_json::to_string(&ErrorLine {
                finish_reason: "error",
                message,
            })?
        ),
        ChatEvent::Done { usage } => format!(
            "e:{}\n",
            serde_json::to_string(&StopLine {
                finish_reason: "stop",
                usage,
                is_continued: false,
            })?
        ),
    };
    Ok(line)
}
