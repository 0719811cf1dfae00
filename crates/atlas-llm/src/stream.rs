//! Incremental turn events.

use std::pin::Pin;

use futures::Stream;

use crate::errors::SDKError;
use crate::types::{Citation, FinishReason, Response, ToolCall, Usage};

pub type StreamEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, SDKError>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEventType {
    StreamStart,
    TextStart,
    TextDelta,
    TextEnd,
    ReasoningDelta,
    ToolCallStart,
    ToolCallDelta,
    ToolCallEnd,
    Citation,
    Finish,
    Error,
    /// A service event with no typed counterpart, passed through as JSON.
    ProviderEvent,
}

/// One step of a streamed turn.
///
/// A stream that succeeds ends with exactly one `Finish` event whose
/// `response` is the finalized turn; only then may tool calls be read. A
/// stream that fails ends with one `Error` event instead.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEvent {
    pub event_type: StreamEventType,
    pub delta: Option<String>,
    /// Groups the deltas of one output text item.
    pub text_id: Option<String>,
    pub reasoning_delta: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub citation: Option<Citation>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    pub response: Option<Box<Response>>,
    pub error: Option<SDKError>,
    pub payload: Option<serde_json::Value>,
}

impl StreamEvent {
    pub fn new(event_type: StreamEventType) -> Self {
        Self {
            event_type,
            delta: None,
            text_id: None,
            reasoning_delta: None,
            tool_call: None,
            citation: None,
            finish_reason: None,
            usage: None,
            response: None,
            error: None,
            payload: None,
        }
    }

    fn with(event_type: StreamEventType, fill: impl FnOnce(&mut Self)) -> Self {
        let mut event = Self::new(event_type);
        fill(&mut event);
        event
    }

    pub fn stream_start() -> Self {
        Self::new(StreamEventType::StreamStart)
    }

    pub fn text_start(text_id: impl Into<String>) -> Self {
        Self::with(StreamEventType::TextStart, |e| e.text_id = Some(text_id.into()))
    }

    pub fn text_delta(text_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::with(StreamEventType::TextDelta, |e| {
            e.text_id = Some(text_id.into());
            e.delta = Some(delta.into());
        })
    }

    pub fn text_end(text_id: impl Into<String>) -> Self {
        Self::with(StreamEventType::TextEnd, |e| e.text_id = Some(text_id.into()))
    }

    pub fn reasoning_delta(delta: impl Into<String>) -> Self {
        Self::with(StreamEventType::ReasoningDelta, |e| {
            e.reasoning_delta = Some(delta.into())
        })
    }

    pub fn tool_call(event_type: StreamEventType, call: ToolCall) -> Self {
        Self::with(event_type, |e| e.tool_call = Some(call))
    }

    pub fn citation(citation: Citation) -> Self {
        Self::with(StreamEventType::Citation, |e| e.citation = Some(citation))
    }

    pub fn finish(response: Response) -> Self {
        Self::with(StreamEventType::Finish, |e| {
            e.finish_reason = Some(response.finish_reason.clone());
            e.usage = Some(response.usage.clone());
            e.response = Some(Box::new(response));
        })
    }

    pub fn error(error: SDKError) -> Self {
        Self::with(StreamEventType::Error, |e| e.error = Some(error))
    }

    pub fn provider_event(payload: serde_json::Value) -> Self {
        Self::with(StreamEventType::ProviderEvent, |e| e.payload = Some(payload))
    }

    /// Text delta content, if this is a non-empty text delta.
    pub fn text(&self) -> Option<&str> {
        match self.event_type {
            StreamEventType::TextDelta => self.delta.as_deref().filter(|delta| !delta.is_empty()),
            _ => None,
        }
    }

    /// `Finish` and `Error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            StreamEventType::Finish | StreamEventType::Error
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_non_empty_text_deltas_carry_text() {
        assert_eq!(StreamEvent::text_delta("t0", "hi").text(), Some("hi"));
        assert_eq!(StreamEvent::text_delta("t0", "").text(), None);
        assert_eq!(StreamEvent::reasoning_delta("hmm").text(), None);
    }

    #[test]
    fn finish_and_error_are_terminal() {
        assert!(StreamEvent::error(SDKError::stream("cut")).is_terminal());
        assert!(!StreamEvent::stream_start().is_terminal());
    }
}
