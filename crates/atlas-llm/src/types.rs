//! Turns, requests, and finalized responses.
//!
//! These are the only shapes the rest of Atlas sees. Adapters translate
//! them to and from service JSON in exactly one place each.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A call the model asked for, as it appears inside an assistant turn.
/// `arguments` may still be an unparsed JSON string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallData {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The answer to one tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultData {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContentPart {
    Text(String),
    ToolCall(ToolCallData),
    ToolResult(ToolResultData),
    /// Reasoning summary the service chose to expose.
    Reasoning(String),
}

impl ContentPart {
    pub fn text(content: impl Into<String>) -> Self {
        ContentPart::Text(content.into())
    }

    pub fn tool_call(data: ToolCallData) -> Self {
        ContentPart::ToolCall(data)
    }

    pub fn reasoning(summary: impl Into<String>) -> Self {
        ContentPart::Reasoning(summary.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultData> {
        match self {
            ContentPart::ToolResult(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(content)],
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let tool_call_id = tool_call_id.into();
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult(ToolResultData {
                tool_call_id: tool_call_id.clone(),
                content: content.into(),
                is_error,
            })],
            tool_call_id: Some(tool_call_id),
        }
    }

    /// All text parts joined, or an empty string.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ContentPart::as_text).collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallData> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }
}

/// A callable function tool. `parameters` is a JSON Schema object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Service-side capabilities such as `web_search`, passed by tag.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub builtin_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

impl Request {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            builtin_tools: Vec::new(),
            tool_choice: None,
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
        }
    }

    /// An empty list leaves the request without tools.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = (!tools.is_empty()).then_some(tools);
        self
    }

    pub fn with_builtin_tool(mut self, tag: impl Into<String>) -> Self {
        self.builtin_tools.push(tag.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn new(reason: &str) -> Self {
        match reason {
            "stop" | "completed" => FinishReason::Stop,
            "length" | "max_output_tokens" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// One finalized turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub message: Message,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// The service's JSON, for non-streaming calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl Response {
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn reasoning(&self) -> Option<String> {
        let summary: String = self
            .message
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Reasoning(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!summary.is_empty()).then_some(summary)
    }

    /// Requested tool calls, in emission order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.message.tool_calls().map(ToolCall::from).collect()
    }
}

/// Token counts. `raw` holds the service's usage object and is `None` when
/// the service did not report usage at all.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl Usage {
    pub fn is_reported(&self) -> bool {
        self.raw.is_some()
    }
}

/// A tool call ready for dispatch: arguments are decoded JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Set, with `arguments` left as `{}`, when the service sent argument
    /// text that is not JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl From<&ToolCallData> for ToolCall {
    fn from(data: &ToolCallData) -> Self {
        let (arguments, raw_arguments) = match &data.arguments {
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed) => (parsed, None),
                Err(_) => (Value::Object(Default::default()), Some(text.clone())),
            },
            decoded => (decoded.clone(), None),
        };
        ToolCall {
            id: data.id.clone(),
            name: data.name.clone(),
            arguments,
            raw_arguments,
        }
    }
}
