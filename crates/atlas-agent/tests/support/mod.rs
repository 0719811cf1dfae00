#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atlas_agent::ChatEvent;
use atlas_llm::{
    Citation, ContentPart, FinishReason, Message, ProviderAdapter, Request, Response, Role,
    SDKError, StreamEvent, StreamEventStream, StreamEventType, ToolCall, ToolCallData, Usage,
};
use atlas_sandbox::{BackendError, ExecutionOutput, SandboxBackend, SandboxHandle};
use futures::StreamExt;
use serde_json::{Value, json};

pub const CHART: &str = "![chart](data:image/png;base64,iVBORw0KGgoAAAANSUhEUg==)";

pub enum Turn {
    Reply(Response),
    Fail(SDKError),
}

/// Provider double that plays back scripted turns and records requests.
#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    repeat: Option<Response>,
    completions: Mutex<VecDeque<Result<Response, SDKError>>>,
    requests: Mutex<Vec<Request>>,
    completion_requests: Mutex<Vec<Request>>,
    web_search: bool,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            web_search: true,
            ..Default::default()
        }
    }

    /// Streams the same turn on every call.
    pub fn always(turn: Response) -> Self {
        Self {
            repeat: Some(turn),
            web_search: true,
            ..Default::default()
        }
    }

    pub fn with_completions(self, completions: Vec<Result<Response, SDKError>>) -> Self {
        *self.completions.lock().expect("completions") = completions.into();
        self
    }

    pub fn without_web_search(mut self) -> Self {
        self.web_search = false;
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests").clone()
    }

    pub fn completion_requests(&self) -> Vec<Request> {
        self.completion_requests.lock().expect("requests").clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: Request) -> Result<Response, SDKError> {
        self.completion_requests
            .lock()
            .expect("requests")
            .push(request);
        self.completions
            .lock()
            .expect("completions")
            .pop_front()
            .unwrap_or_else(|| Err(SDKError::stream("no scripted completion left")))
    }

    async fn stream(&self, request: Request) -> Result<StreamEventStream, SDKError> {
        self.requests.lock().expect("requests").push(request);
        let turn = match &self.repeat {
            Some(response) => Turn::Reply(response.clone()),
            None => self
                .turns
                .lock()
                .expect("turns")
                .pop_front()
                .unwrap_or_else(|| Turn::Fail(SDKError::stream("no scripted turn left"))),
        };

        let mut events = vec![StreamEvent::stream_start()];
        match turn {
            Turn::Reply(response) => {
                let text = response.text();
                if !text.is_empty() {
                    events.push(StreamEvent::text_start("t0"));
                    for word in text.split_inclusive(' ') {
                        events.push(StreamEvent::text_delta("t0", word));
                    }
                    events.push(StreamEvent::text_end("t0"));
                }
                for call in response.tool_calls() {
                    let start = StreamEvent::tool_call(StreamEventType::ToolCallStart, call.clone());
                    events.push(start);
                    events.push(StreamEvent::tool_call(StreamEventType::ToolCallEnd, call));
                }
                events.push(StreamEvent::finish(response));
            }
            Turn::Fail(error) => {
                events.push(StreamEvent::text_delta("t0", "partial"));
                events.push(StreamEvent::error(error));
            }
        }
        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }

    fn supports_builtin_tool(&self, tag: &str) -> bool {
        self.web_search && tag == "web_search"
    }
}

fn usage(input: u64, output: u64) -> Usage {
    Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
        raw: Some(json!({"input_tokens": input, "output_tokens": output})),
        ..Default::default()
    }
}

fn response(parts: Vec<ContentPart>, finish: &str) -> Response {
    Response {
        id: "resp_test".into(),
        model: "test-model".into(),
        provider: "scripted".into(),
        message: Message {
            role: Role::Assistant,
            content: parts,
            tool_call_id: None,
        },
        finish_reason: FinishReason::new(finish),
        usage: usage(10, 5),
        citations: Vec::new(),
        raw: None,
    }
}

pub fn text_reply(text: &str) -> Response {
    response(vec![ContentPart::text(text)], "stop")
}

pub fn tool_reply(calls: &[(&str, &str, Value)]) -> Response {
    let parts = calls
        .iter()
        .map(|(id, name, arguments)| {
            ContentPart::tool_call(ToolCallData {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.clone(),
            })
        })
        .collect();
    response(parts, "tool_calls")
}

pub fn cited_reply(text: &str, citations: Vec<Citation>) -> Response {
    let mut reply = text_reply(text);
    reply.citations = citations;
    reply
}

pub fn unreported_usage(mut reply: Response) -> Response {
    reply.usage = Usage::default();
    reply
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
        raw_arguments: None,
    }
}

/// Sandbox double. `print("x")` lines echo to stdout, `show_chart()` emits an
/// inline image, `raise X` writes to stderr.
#[derive(Default)]
pub struct EchoBackend {
    pub log: Arc<Mutex<Vec<String>>>,
    pub fail_create: bool,
    /// How long each `run` hangs before answering.
    pub run_delay: Option<Duration>,
}

impl EchoBackend {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("log").clone()
    }
}

struct EchoSandbox {
    log: Arc<Mutex<Vec<String>>>,
    run_delay: Option<Duration>,
}

#[async_trait]
impl SandboxBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn create(&self) -> Result<Box<dyn SandboxHandle>, BackendError> {
        if self.fail_create {
            return Err(BackendError::Http {
                status: 503,
                message: "no capacity".into(),
            });
        }
        self.log.lock().expect("log").push("create".into());
        Ok(Box::new(EchoSandbox {
            log: self.log.clone(),
            run_delay: self.run_delay,
        }))
    }
}

#[async_trait]
impl SandboxHandle for EchoSandbox {
    fn id(&self) -> &str {
        "sbx-echo"
    }

    async fn write_file(&self, name: &str, _bytes: Vec<u8>) -> Result<(), BackendError> {
        self.log.lock().expect("log").push(format!("write {name}"));
        Ok(())
    }

    async fn run(&self, code: &str) -> Result<ExecutionOutput, BackendError> {
        self.log.lock().expect("log").push(format!("run {code}"));
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        let mut output = ExecutionOutput::default();
        for line in code.lines().map(str::trim) {
            if let Some(text) = line
                .strip_prefix("print(\"")
                .and_then(|rest| rest.strip_suffix("\")"))
            {
                output.stdout.push(text.to_string());
            } else if line == "show_chart()" {
                output.stdout.push(CHART.to_string());
            } else if let Some(error) = line.strip_prefix("raise ") {
                output.stderr.push(format!("{error}: raised"));
            }
        }
        Ok(output)
    }

    async fn destroy(&self) -> Result<(), BackendError> {
        self.log.lock().expect("log").push("destroy".into());
        Ok(())
    }
}

pub async fn collect(stream: atlas_agent::ChatEventStream) -> Vec<ChatEvent> {
    stream.collect().await
}

pub fn visible_text(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::TextDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Tool-result messages of a request, as `(call id, text, is_error)`.
pub fn tool_results(request: &Request) -> Vec<(String, String, bool)> {
    request
        .messages
        .iter()
        .filter(|message| message.role == Role::Tool)
        .flat_map(|message| &message.content)
        .filter_map(|part| part.as_tool_result())
        .map(|result| {
            (
                result.tool_call_id.clone(),
                result.content.clone(),
                result.is_error,
            )
        })
        .collect()
}
