//! Folds a `StreamEvent` sequence into the finalized `Response`.

use std::collections::HashMap;

use crate::errors::SDKError;
use crate::stream::{StreamEvent, StreamEventType};
use crate::types::{
    Citation, ContentPart, FinishReason, Message, Response, Role, ToolCall, ToolCallData, Usage,
};

#[derive(Clone, Debug, Default)]
pub struct ResponseSeed {
    pub id: String,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    seed: ResponseSeed,
    text_order: Vec<String>,
    text_segments: HashMap<String, String>,
    reasoning: String,
    tool_call_order: Vec<String>,
    tool_calls: HashMap<String, ToolCallData>,
    citations: Vec<Citation>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    response: Option<Response>,
    error: Option<SDKError>,
}

impl StreamAccumulator {
    pub fn new(seed: ResponseSeed) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    pub fn process(&mut self, event: &StreamEvent) {
        if let Some(response) = &event.response {
            self.response = Some(response.as_ref().clone());
        }

        match event.event_type {
            StreamEventType::TextStart | StreamEventType::TextDelta => {
                let id = event.text_id.as_deref().unwrap_or("default").to_string();
                if !self.text_segments.contains_key(&id) {
                    self.text_order.push(id.clone());
                }
                let entry = self.text_segments.entry(id).or_default();
                if let Some(delta) = &event.delta {
                    entry.push_str(delta);
                }
            }
            StreamEventType::ReasoningDelta => {
                if let Some(delta) = &event.reasoning_delta {
                    self.reasoning.push_str(delta);
                }
            }
            StreamEventType::ToolCallStart
            | StreamEventType::ToolCallDelta
            | StreamEventType::ToolCallEnd => {
                if let Some(tool_call) = &event.tool_call {
                    self.upsert_tool_call(tool_call);
                }
            }
            StreamEventType::Citation => {
                if let Some(citation) = &event.citation {
                    if !self.citations.contains(citation) {
                        self.citations.push(citation.clone());
                    }
                }
            }
            StreamEventType::Finish => {
                self.finish_reason = event.finish_reason.clone();
                self.usage = event.usage.clone();
                if self.finish_reason.is_none() {
                    self.finish_reason = Some(FinishReason::new("stop"));
                }
            }
            StreamEventType::Error => {
                self.error = event.error.clone();
            }
            _ => {}
        }
    }

    /// True once a `Finish` event has been observed.
    pub fn is_complete(&self) -> bool {
        self.finish_reason.is_some() || self.response.is_some()
    }

    pub fn error(&self) -> Option<&SDKError> {
        self.error.as_ref()
    }

    /// Text streamed so far, in segment order.
    pub fn text(&self) -> String {
        self.text_order
            .iter()
            .filter_map(|id| self.text_segments.get(id))
            .map(String::as_str)
            .collect()
    }

    pub fn response(&self) -> Response {
        if let Some(response) = &self.response {
            return response.clone();
        }

        let mut parts = Vec::new();
        let text = self.text();
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        if !self.reasoning.is_empty() {
            parts.push(ContentPart::reasoning(self.reasoning.clone()));
        }
        for id in &self.tool_call_order {
            if let Some(call) = self.tool_calls.get(id) {
                parts.push(ContentPart::tool_call(call.clone()));
            }
        }

        Response {
            id: self.seed.id.clone(),
            model: self.seed.model.clone(),
            provider: self.seed.provider.clone(),
            message: Message {
                role: Role::Assistant,
                content: parts,
                tool_call_id: None,
            },
            finish_reason: self
                .finish_reason
                .clone()
                .unwrap_or_else(|| FinishReason::new("other")),
            usage: self.usage.clone().unwrap_or_default(),
            citations: self.citations.clone(),
            raw: None,
        }
    }

    fn upsert_tool_call(&mut self, tool_call: &ToolCall) {
        let data = ToolCallData {
            id: tool_call.id.clone(),
            name: tool_call.name.clone(),
            arguments: match &tool_call.raw_arguments {
                Some(raw) => serde_json::Value::String(raw.clone()),
                None => tool_call.arguments.clone(),
            },
        };
        if !self.tool_calls.contains_key(&data.id) {
            self.tool_call_order.push(data.id.clone());
        }
        self.tool_calls.insert(data.id.clone(), data);
    }
}
