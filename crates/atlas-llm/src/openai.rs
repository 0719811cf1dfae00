//! OpenAI Responses API adapter (`/v1/responses`).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::errors::{
    AdapterTimeout, ProviderError, ProviderErrorKind, SDKError, StatusClass, classify_message,
    map_http_status,
};
use crate::provider::ProviderAdapter;
use crate::stream::{StreamEvent, StreamEventStream, StreamEventType};
use crate::types::{
    Citation, ContentPart, FinishReason, Message, Request, Response, Role, ToolCall,
    ToolCallData, ToolChoice, Usage,
};
use crate::utils::{SseDecoder, SseEvent};

const PROVIDER: &str = "openai";
const BUILTIN_TOOLS: &[&str] = &["web_search", "web_search_preview"];

#[derive(Clone, Debug)]
pub struct OpenAIAdapterConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: AdapterTimeout,
}

impl OpenAIAdapterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: AdapterTimeout::default(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        Some(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: AdapterTimeout) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Clone)]
pub struct OpenAIAdapter {
    client: reqwest::Client,
    config: OpenAIAdapterConfig,
}

impl std::fmt::Debug for OpenAIAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIAdapter")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl OpenAIAdapter {
    pub fn new(config: OpenAIAdapterConfig) -> Result<Self, SDKError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|error| {
                SDKError::configuration(format!("invalid OpenAI API key header: {error}"))
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout.connect)
            .default_headers(headers)
            .build()
            .map_err(|error| SDKError::network(error.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }

    /// Send `body` and check the status. A whole-call deadline covers the
    /// body of non-streaming calls; streaming calls only bound the wait
    /// for response headers, and chunk silence is left to [`pump`].
    async fn post(&self, body: &Value, stream: bool) -> Result<reqwest::Response, SDKError> {
        let limit = self.config.timeout.request;
        let builder = self.client.post(self.endpoint()).json(body);
        let sent = if stream {
            tokio::time::timeout(limit, builder.send())
                .await
                .map_err(|_| SDKError::timeout(format!("no response headers within {limit:?}")))?
        } else {
            builder.timeout(limit).send().await
        };
        let response = sent.map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let raw = response.text().await.unwrap_or_default();
            return Err(build_provider_error(status, &raw));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, request: Request) -> Result<Response, SDKError> {
        let body = build_responses_body(&request, false)?;
        let response = self.post(&body, false).await?;
        let raw_json = response.json::<Value>().await.map_err(transport_error)?;
        parse_responses_api_response(raw_json)
    }

    async fn stream(&self, request: Request) -> Result<StreamEventStream, SDKError> {
        let body = build_responses_body(&request, true)?;
        let response = self.post(&body, true).await?;
        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(pump(
            response.bytes_stream(),
            ResponsesStream::new(tx),
            self.config.timeout.stream_read,
        ));
        Ok(Box::pin(rx))
    }

    fn supports_builtin_tool(&self, tag: &str) -> bool {
        BUILTIN_TOOLS.contains(&tag)
    }
}

/// Drive one SSE body to its end, guaranteeing exactly one terminal event.
async fn pump<S, B, E>(body: S, mut translator: ResponsesStream, read_timeout: Duration)
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    loop {
        let chunk = match tokio::time::timeout(read_timeout, body.next()).await {
            Err(_) => {
                return translator.fail(SDKError::stream(format!(
                    "no data from OpenAI for {read_timeout:?}"
                )));
            }
            Ok(None) => break,
            Ok(Some(Err(error))) => return translator.fail(SDKError::stream(error.to_string())),
            Ok(Some(Ok(chunk))) => chunk,
        };
        for event in decoder.feed(chunk.as_ref()) {
            if translator.translate(&event) == Flow::Done {
                return;
            }
        }
    }
    if let Some(event) = decoder.finish() {
        if translator.translate(&event) == Flow::Done {
            return;
        }
    }
    translator.fail(SDKError::stream(
        "OpenAI stream ended before the response completed",
    ));
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

/// Turns Responses API SSE payloads into [`StreamEvent`]s.
struct ResponsesStream {
    tx: mpsc::UnboundedSender<Result<StreamEvent, SDKError>>,
    open_texts: HashSet<String>,
    /// Output item id to call id; argument deltas only name the item.
    call_ids: HashMap<String, String>,
    calls: HashMap<String, ToolCall>,
}

impl ResponsesStream {
    fn new(tx: mpsc::UnboundedSender<Result<StreamEvent, SDKError>>) -> Self {
        Self {
            tx,
            open_texts: HashSet::new(),
            call_ids: HashMap::new(),
            calls: HashMap::new(),
        }
    }

    /// A closed receiver also ends translation.
    fn emit(&self, event: StreamEvent) -> Flow {
        match self.tx.unbounded_send(Ok(event)) {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Done,
        }
    }

    fn fail(&self, error: SDKError) {
        tracing::debug!(error = %error, "openai stream ended with error");
        let _ = self.tx.unbounded_send(Ok(StreamEvent::error(error)));
    }

    fn translate(&mut self, event: &SseEvent) -> Flow {
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Flow::Continue;
        }
        let payload: Value = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(error) => {
                self.fail(SDKError::stream(format!(
                    "invalid OpenAI SSE event JSON: {error}"
                )));
                return Flow::Done;
            }
        };

        match str_field(&payload, "type").unwrap_or_default() {
            "response.created" => self.emit(StreamEvent::stream_start()),
            "response.output_text.delta" => {
                let text_id = str_field(&payload, "item_id").unwrap_or("text_0").to_string();
                if self.open_texts.insert(text_id.clone())
                    && self.emit(StreamEvent::text_start(text_id.clone())) == Flow::Done
                {
                    return Flow::Done;
                }
                let delta = str_field(&payload, "delta").unwrap_or_default();
                self.emit(StreamEvent::text_delta(text_id, delta))
            }
            "response.output_text.done" => {
                let text_id = str_field(&payload, "item_id").unwrap_or("text_0");
                self.emit(StreamEvent::text_end(text_id))
            }
            "response.output_text.annotation.added" => {
                match payload.get("annotation").and_then(parse_citation) {
                    Some(citation) => self.emit(StreamEvent::citation(citation)),
                    None => Flow::Continue,
                }
            }
            "response.reasoning_summary_text.delta" => {
                let delta = str_field(&payload, "delta").unwrap_or_default();
                self.emit(StreamEvent::reasoning_delta(delta))
            }
            "response.output_item.added" => match function_call_item(&payload) {
                Some(item) => self.call_started(item),
                None => Flow::Continue,
            },
            "response.function_call_arguments.delta" => self.arguments_delta(&payload),
            "response.output_item.done" => match function_call_item(&payload) {
                Some(item) => self.call_finished(item),
                None => Flow::Continue,
            },
            "response.completed" | "response.incomplete" => {
                let Some(response) = payload.get("response").cloned() else {
                    return Flow::Continue;
                };
                match parse_responses_api_response(response) {
                    Ok(parsed) => {
                        self.emit(StreamEvent::finish(parsed));
                    }
                    Err(error) => self.fail(error),
                }
                Flow::Done
            }
            "response.failed" => {
                let error = payload
                    .get("response")
                    .and_then(|response| response.get("error"))
                    .cloned()
                    .unwrap_or(Value::Null);
                self.fail(stream_error_from_payload(&error));
                Flow::Done
            }
            "error" => {
                let error = payload.get("error").unwrap_or(&payload);
                self.fail(stream_error_from_payload(error));
                Flow::Done
            }
            _ => self.emit(StreamEvent::provider_event(payload)),
        }
    }

    fn call_started(&mut self, item: &Value) -> Flow {
        let call_id = item_call_id(item);
        if let Some(item_id) = str_field(item, "id") {
            self.call_ids.insert(item_id.to_string(), call_id.clone());
        }
        let call = ToolCall {
            id: call_id.clone(),
            name: str_field(item, "name").unwrap_or("unknown").to_string(),
            arguments: Value::Object(Default::default()),
            raw_arguments: Some(str_field(item, "arguments").unwrap_or_default().to_string()),
        };
        self.calls.insert(call_id, call.clone());
        self.emit(StreamEvent::tool_call(StreamEventType::ToolCallStart, call))
    }

    fn arguments_delta(&mut self, payload: &Value) -> Flow {
        let call_id = match str_field(payload, "call_id") {
            Some(call_id) => call_id.to_string(),
            None => {
                let item_id = str_field(payload, "item_id").unwrap_or("call_unknown");
                self.call_ids
                    .get(item_id)
                    .cloned()
                    .unwrap_or_else(|| item_id.to_string())
            }
        };
        let call = self.calls.entry(call_id.clone()).or_insert_with(|| ToolCall {
            id: call_id,
            name: "unknown".to_string(),
            arguments: Value::Object(Default::default()),
            raw_arguments: None,
        });
        call.raw_arguments
            .get_or_insert_with(String::new)
            .push_str(str_field(payload, "delta").unwrap_or_default());
        let snapshot = call.clone();
        self.emit(StreamEvent::tool_call(StreamEventType::ToolCallDelta, snapshot))
    }

    fn call_finished(&mut self, item: &Value) -> Flow {
        let call_id = item_call_id(item);
        let text = str_field(item, "arguments").map(str::to_string).or_else(|| {
            self.calls
                .get(&call_id)
                .and_then(|call| call.raw_arguments.clone())
        });
        let call = ToolCall::from(&ToolCallData {
            id: call_id.clone(),
            name: str_field(item, "name").unwrap_or("unknown").to_string(),
            arguments: Value::String(text.unwrap_or_default()),
        });
        self.calls.insert(call_id, call.clone());
        self.emit(StreamEvent::tool_call(StreamEventType::ToolCallEnd, call))
    }
}

fn transport_error(error: reqwest::Error) -> SDKError {
    if error.is_timeout() {
        SDKError::timeout(error.to_string())
    } else {
        SDKError::network(error.to_string())
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn function_call_item(payload: &Value) -> Option<&Value> {
    payload
        .get("item")
        .filter(|item| str_field(item, "type") == Some("function_call"))
}

fn item_call_id(item: &Value) -> String {
    str_field(item, "call_id")
        .or_else(|| str_field(item, "id"))
        .unwrap_or("call_unknown")
        .to_string()
}

fn stream_error_from_payload(error: &Value) -> SDKError {
    let message = str_field(error, "message")
        .unwrap_or("OpenAI stream reported an error")
        .to_string();
    let kind = classify_message(&message).unwrap_or(ProviderErrorKind::Other);
    let mut provider_error = ProviderError::new(PROVIDER, kind, message);
    provider_error.error_code = str_field(error, "code").map(ToString::to_string);
    if !error.is_null() {
        provider_error.raw = Some(error.clone());
    }
    SDKError::Provider(provider_error)
}

pub(crate) fn build_responses_body(request: &Request, stream: bool) -> Result<Value, SDKError> {
    let mut body = json!({
        "model": request.model,
        "stream": stream,
    });

    let (instructions, input) = translate_messages_to_responses_input(&request.messages);
    if let Some(instructions) = instructions {
        body["instructions"] = Value::String(instructions);
    }
    body["input"] = input;

    let mut tools: Vec<Value> = request
        .tools
        .iter()
        .flatten()
        .map(|tool| {
            json!({
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters
            })
        })
        .collect();
    for tag in &request.builtin_tools {
        if !BUILTIN_TOOLS.contains(&tag.as_str()) {
            return Err(SDKError::configuration(format!(
                "unsupported builtin tool '{tag}'"
            )));
        }
        tools.push(json!({ "type": tag }));
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools);
    }
    if let Some(tool_choice) = &request.tool_choice {
        body["tool_choice"] = match tool_choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Named(name) => json!({ "type": "function", "name": name }),
        };
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_output_tokens"] = json!(max_tokens);
    }
    if let Some(reasoning_effort) = &request.reasoning_effort {
        body["reasoning"] = json!({ "effort": reasoning_effort });
    }
    Ok(body)
}

fn translate_messages_to_responses_input(messages: &[Message]) -> (Option<String>, Value) {
    let mut instructions = Vec::new();
    let mut input = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                let text = message.text();
                if !text.is_empty() {
                    instructions.push(text);
                }
            }
            Role::Tool => {
                for result in message.content.iter().filter_map(ContentPart::as_tool_result) {
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": result.tool_call_id,
                        "output": result.content
                    }));
                }
            }
            Role::User | Role::Assistant => {
                let (role, kind) = if message.role == Role::Assistant {
                    ("assistant", "output_text")
                } else {
                    ("user", "input_text")
                };
                let content: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(ContentPart::as_text)
                    .map(|text| json!({ "type": kind, "text": text }))
                    .collect();
                if !content.is_empty() {
                    input.push(json!({
                        "type": "message",
                        "role": role,
                        "content": content
                    }));
                }

                for tool_call in message.tool_calls() {
                    let arguments = match &tool_call.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    input.push(json!({
                        "type": "function_call",
                        "call_id": tool_call.id,
                        "name": tool_call.name,
                        "arguments": arguments
                    }));
                }
            }
        }
    }

    let instructions = if instructions.is_empty() {
        None
    } else {
        Some(instructions.join("\n\n"))
    };

    (instructions, Value::Array(input))
}

fn parse_citation(annotation: &Value) -> Option<Citation> {
    if str_field(annotation, "type") != Some("url_citation") {
        return None;
    }
    Some(Citation {
        url: str_field(annotation, "url")?.to_string(),
        title: str_field(annotation, "title").map(ToString::to_string),
    })
}

pub(crate) fn parse_responses_api_response(raw_json: Value) -> Result<Response, SDKError> {
    if let Some(error) = raw_json.get("error").filter(|error| !error.is_null()) {
        return Err(stream_error_from_payload(error));
    }
    let id = str_field(&raw_json, "id").unwrap_or("resp_unknown").to_string();
    let model = str_field(&raw_json, "model").unwrap_or("unknown").to_string();
    let output = raw_json
        .get("output")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut message_parts = Vec::new();
    let mut citations = Vec::new();
    let mut has_tool_calls = false;
    for item in &output {
        match str_field(item, "type") {
            Some("message") => {
                for part in item
                    .get("content")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    if str_field(part, "type") != Some("output_text") {
                        continue;
                    }
                    if let Some(text) = str_field(part, "text") {
                        message_parts.push(ContentPart::text(text));
                    }
                    citations.extend(
                        part.get("annotations")
                            .and_then(Value::as_array)
                            .into_iter()
                            .flatten()
                            .filter_map(parse_citation),
                    );
                }
            }
            Some("reasoning") => {
                let summary: String = item
                    .get("summary")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|entry| str_field(entry, "text"))
                    .collect();
                if !summary.is_empty() {
                    message_parts.push(ContentPart::reasoning(summary));
                }
            }
            Some("function_call") => {
                has_tool_calls = true;
                let arguments = str_field(item, "arguments")
                    .map(|raw| {
                        serde_json::from_str::<Value>(raw)
                            .unwrap_or_else(|_| Value::String(raw.to_string()))
                    })
                    .unwrap_or_else(|| Value::Object(Default::default()));
                message_parts.push(ContentPart::tool_call(ToolCallData {
                    id: item_call_id(item),
                    name: str_field(item, "name").unwrap_or("unknown").to_string(),
                    arguments,
                }));
            }
            _ => {}
        }
    }

    let incomplete = raw_json
        .get("incomplete_details")
        .and_then(|details| str_field(details, "reason"));
    let finish_reason = match (has_tool_calls, incomplete) {
        (true, _) => FinishReason::ToolCalls,
        (false, Some(reason)) => FinishReason::new(reason),
        (false, None) => FinishReason::Stop,
    };

    let usage = parse_responses_usage(raw_json.get("usage"));

    Ok(Response {
        id,
        model,
        provider: PROVIDER.to_string(),
        message: Message {
            role: Role::Assistant,
            content: message_parts,
            tool_call_id: None,
        },
        finish_reason,
        usage,
        citations,
        raw: Some(raw_json),
    })
}

fn parse_responses_usage(raw_usage: Option<&Value>) -> Usage {
    let Some(usage) = raw_usage.filter(|usage| !usage.is_null()) else {
        return Usage::default();
    };
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or_default();
    Usage {
        input_tokens: count("input_tokens"),
        output_tokens: count("output_tokens"),
        total_tokens: count("total_tokens"),
        reasoning_tokens: usage
            .get("output_tokens_details")
            .and_then(|details| details.get("reasoning_tokens"))
            .and_then(Value::as_u64),
        cache_read_tokens: usage
            .get("input_tokens_details")
            .and_then(|details| details.get("cached_tokens"))
            .and_then(Value::as_u64),
        raw: Some(usage.clone()),
    }
}

fn build_provider_error(status: u16, body_text: &str) -> SDKError {
    let raw_json = serde_json::from_str::<Value>(body_text).ok();
    let error_object = raw_json.as_ref().and_then(|json| json.get("error"));
    let message = error_object
        .and_then(|error| str_field(error, "message"))
        .or_else(|| raw_json.as_ref().and_then(|json| str_field(json, "message")))
        .unwrap_or(body_text)
        .to_string();

    let kind = match map_http_status(status) {
        Some(StatusClass::Timeout) => return SDKError::timeout(message),
        Some(StatusClass::Provider(kind)) => kind,
        None => classify_message(&message).unwrap_or(ProviderErrorKind::Other),
    };
    SDKError::Provider(ProviderError {
        status_code: Some(status),
        error_code: error_object
            .and_then(|error| str_field(error, "code"))
            .map(ToString::to_string),
        raw: raw_json,
        ..ProviderError::new(PROVIDER, kind, message)
    })
}
