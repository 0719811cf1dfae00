use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use atlas_llm::{
    AdapterTimeout, FinishReason, Message, OpenAIAdapter, OpenAIAdapterConfig, ProviderAdapter, ProviderErrorKind,
    Request, ResponseSeed, SDKError, StreamAccumulator, StreamEventType, ToolDefinition,
};
use futures::StreamExt;
use serde_json::json;

/// Reads headers and the full `Content-Length` body.
fn read_request(socket: &mut std::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = socket.read(&mut buffer).expect("read request");
        if read == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..read]);
        let text = String::from_utf8_lossy(&data);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

fn spawn_single_response_server(
    status: u16,
    content_type: &str,
    body: String,
    must_contain: Vec<&'static str>,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let address = listener.local_addr().expect("listener addr");
    let content_type = content_type.to_string();

    thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("accept");
        let request = read_request(&mut socket);
        let first_line = request.lines().next().unwrap_or_default().to_string();
        assert!(
            first_line.contains("/responses"),
            "expected responses path, first line: {}",
            first_line
        );
        for expected in &must_contain {
            assert!(
                request.contains(expected),
                "expected request to contain '{}', request: {}",
                expected,
                request
            );
        }

        let status_text = match status {
            200 => "OK",
            401 => "Unauthorized",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            _ => "OK",
        };
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text,
            content_type,
            body.len(),
            body
        );
        socket
            .write_all(response.as_bytes())
            .expect("write response");
        socket.flush().expect("flush");
    });

    format!("http://{}", address)
}

/// Streams an SSE body without a length, one event per `gap`, then keeps
/// the connection open for `hold` before closing it.
fn spawn_trickling_sse_server(
    events: Vec<serde_json::Value>,
    gap: Duration,
    hold: Duration,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let address = listener.local_addr().expect("listener addr");

    thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("accept");
        read_request(&mut socket);
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
            )
            .expect("write headers");
        for event in &events {
            thread::sleep(gap);
            if socket.write_all(sse(std::slice::from_ref(event)).as_bytes()).is_err() {
                return;
            }
            let _ = socket.flush();
        }
        thread::sleep(hold);
    });

    format!("http://{}", address)
}

fn timed_adapter(base_url: String, request: Duration, stream_read: Duration) -> OpenAIAdapter {
    let timeout = AdapterTimeout {
        connect: Duration::from_secs(5),
        request,
        stream_read,
    };
    OpenAIAdapter::new(
        OpenAIAdapterConfig::new("test-key")
            .with_base_url(base_url)
            .with_timeout(timeout),
    )
    .expect("adapter")
}

fn adapter(base_url: String) -> OpenAIAdapter {
    OpenAIAdapter::new(OpenAIAdapterConfig::new("test-key").with_base_url(base_url))
        .expect("adapter")
}

fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|event| {
            format!(
                "event: {}\ndata: {}\n\n",
                event["type"].as_str().unwrap_or("message"),
                event
            )
        })
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn complete_returns_text_and_usage() {
    let body = json!({
        "id": "resp_1",
        "model": "gpt-4.1-mini",
        "status": "completed",
        "output": [{
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "output_text", "text": "Hello from the mock" }]
        }],
        "usage": {
            "input_tokens": 10,
            "output_tokens": 5,
            "total_tokens": 15,
            "output_tokens_details": { "reasoning_tokens": 2 }
        }
    })
    .to_string();

    let base_url = spawn_single_response_server(
        200,
        "application/json",
        body,
        vec!["\"stream\":false", "Bearer test-key"],
    );
    let response = adapter(base_url)
        .complete(Request::new("gpt-4.1-mini", vec![Message::user("hello")]))
        .await
        .expect("complete");

    assert_eq!(response.provider, "openai");
    assert_eq!(response.text(), "Hello from the mock");
    assert_eq!(response.usage.reasoning_tokens, Some(2));
}

#[tokio::test(flavor = "current_thread")]
async fn stream_emits_deltas_then_single_finish() {
    let body = sse(&[
        json!({"type": "response.created"}),
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "delta": "Hel"}),
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "delta": "lo"}),
        json!({"type": "response.output_text.done", "item_id": "msg_1"}),
        json!({"type": "response.completed", "response": {
            "id": "resp_1", "model": "gpt-4.1-mini", "status": "completed",
            "output": [{"id": "msg_1", "type": "message", "role": "assistant",
                "content": [{"type": "output_text", "text": "Hello"}]}],
            "usage": {"input_tokens": 1, "output_tokens": 1, "total_tokens": 2}
        }}),
    ]);
    let base_url = spawn_single_response_server(
        200,
        "text/event-stream",
        body,
        vec!["\"stream\":true"],
    );
    let mut stream = adapter(base_url)
        .stream(Request::new("gpt-4.1-mini", vec![Message::user("hello")]))
        .await
        .expect("stream");

    let mut kinds = Vec::new();
    let mut acc = StreamAccumulator::new(ResponseSeed::default());
    while let Some(event) = stream.next().await {
        let event = event.expect("event");
        kinds.push(event.event_type.clone());
        acc.process(&event);
    }

    assert_eq!(
        kinds,
        vec![
            StreamEventType::StreamStart,
            StreamEventType::TextStart,
            StreamEventType::TextDelta,
            StreamEventType::TextDelta,
            StreamEventType::TextEnd,
            StreamEventType::Finish,
        ]
    );
    assert!(acc.is_complete());
    assert_eq!(acc.response().text(), "Hello");
    assert_eq!(acc.response().usage.total_tokens, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn stream_assembles_function_call_arguments_from_item_deltas() {
    let body = sse(&[
        json!({"type": "response.created"}),
        json!({"type": "response.output_item.added", "item": {
            "type": "function_call", "id": "fc_1", "call_id": "call_1",
            "name": "analyze_data", "arguments": ""
        }}),
        json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "delta": "{\"query\":"}),
        json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "delta": "\"mean\"}"}),
        json!({"type": "response.output_item.done", "item": {
            "type": "function_call", "id": "fc_1", "call_id": "call_1",
            "name": "analyze_data", "arguments": "{\"query\":\"mean\"}"
        }}),
        json!({"type": "response.completed", "response": {
            "id": "resp_2", "model": "gpt-4.1-mini", "status": "completed",
            "output": [{"type": "function_call", "id": "fc_1", "call_id": "call_1",
                "name": "analyze_data", "arguments": "{\"query\":\"mean\"}"}]
        }}),
    ]);
    let base_url = spawn_single_response_server(
        200,
        "text/event-stream",
        body,
        vec!["\"name\":\"analyze_data\""],
    );
    let request = Request::new("gpt-4.1-mini", vec![Message::user("analyze")]).with_tools(vec![
        ToolDefinition {
            name: "analyze_data".to_string(),
            description: "run analysis".to_string(),
            parameters: json!({"type": "object"}),
        },
    ]);
    let mut stream = adapter(base_url).stream(request).await.expect("stream");

    let mut deltas = Vec::new();
    let mut finish = None;
    while let Some(event) = stream.next().await {
        let event = event.expect("event");
        match event.event_type {
            StreamEventType::ToolCallDelta => {
                let call = event.tool_call.expect("tool call");
                assert_eq!(call.id, "call_1");
                deltas.push(call.raw_arguments.unwrap_or_default());
            }
            StreamEventType::Finish => finish = event.response,
            _ => {}
        }
    }

    assert_eq!(deltas.last().map(String::as_str), Some("{\"query\":\"mean\"}"));
    let response = finish.expect("finish response");
    assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    let calls = response.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].arguments, json!({"query": "mean"}));
}

#[tokio::test(flavor = "current_thread")]
async fn stream_ending_without_completion_yields_error_event() {
    let body = sse(&[
        json!({"type": "response.created"}),
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "delta": "partial"}),
    ]);
    let base_url = spawn_single_response_server(200, "text/event-stream", body, vec![]);
    let mut stream = adapter(base_url)
        .stream(Request::new("gpt-4.1-mini", vec![Message::user("hello")]))
        .await
        .expect("stream");

    let mut last = None;
    while let Some(event) = stream.next().await {
        last = Some(event.expect("event"));
    }
    let last = last.expect("at least one event");
    assert_eq!(last.event_type, StreamEventType::Error);
    match last.error {
        Some(SDKError::Stream(message)) => assert!(message.contains("no data"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn stream_failed_event_becomes_provider_error() {
    let body = sse(&[
        json!({"type": "response.created"}),
        json!({"type": "response.failed", "response": {
            "id": "resp_3", "status": "failed",
            "error": {"code": "server_error", "message": "The model crashed"}
        }}),
    ]);
    let base_url = spawn_single_response_server(200, "text/event-stream", body, vec![]);
    let mut stream = adapter(base_url)
        .stream(Request::new("gpt-4.1-mini", vec![Message::user("hello")]))
        .await
        .expect("stream");

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.expect("event"));
    }
    let last = events.last().expect("events");
    assert_eq!(last.event_type, StreamEventType::Error);
    match last.error.as_ref() {
        Some(SDKError::Provider(error)) => {
            assert_eq!(error.error_code.as_deref(), Some("server_error"));
            assert_eq!(error.message, "The model crashed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(
        !events
            .iter()
            .any(|event| event.event_type == StreamEventType::Finish)
    );
}

#[tokio::test(flavor = "current_thread")]
async fn stream_http_error_is_returned_before_streaming() {
    let body = json!({"error": {"message": "Incorrect API key provided", "code": "invalid_api_key"}})
        .to_string();
    let base_url = spawn_single_response_server(401, "application/json", body, vec![]);
    let result = adapter(base_url)
        .stream(Request::new("gpt-4.1-mini", vec![Message::user("hello")]))
        .await;

    match result {
        Err(SDKError::Provider(error)) => {
            assert_eq!(error.kind, ProviderErrorKind::Authentication);
            assert_eq!(error.status_code, Some(401));
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn stream_may_outlast_the_request_timeout_while_chunks_keep_arriving() {
    let mut events = vec![json!({"type": "response.created", "response": {"id": "resp_slow"}})];
    for index in 0..8 {
        events.push(json!({
            "type": "response.output_text.delta",
            "item_id": "msg_1",
            "delta": format!("part{index} ")
        }));
    }
    events.push(json!({
        "type": "response.completed",
        "response": {
            "id": "resp_slow",
            "model": "gpt-4.1-mini",
            "status": "completed",
            "output": [{
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": "done"}]
            }]
        }
    }));
    let base_url = spawn_trickling_sse_server(events, Duration::from_millis(100), Duration::ZERO);

    let mut stream = timed_adapter(base_url, Duration::from_millis(400), Duration::from_secs(2))
        .stream(Request::new("gpt-4.1-mini", vec![Message::user("hello")]))
        .await
        .expect("stream");
    let mut kinds = Vec::new();
    while let Some(event) = stream.next().await {
        let event = event.expect("event");
        assert!(event.error.is_none(), "unexpected error: {:?}", event.error);
        kinds.push(event.event_type);
    }

    assert_eq!(
        kinds
            .iter()
            .filter(|kind| **kind == StreamEventType::TextDelta)
            .count(),
        8
    );
    assert_eq!(kinds.last(), Some(&StreamEventType::Finish));
}

#[tokio::test(flavor = "current_thread")]
async fn silent_stream_ends_with_error_after_read_timeout() {
    let events = vec![
        json!({"type": "response.created", "response": {"id": "resp_stall"}}),
        json!({"type": "response.output_text.delta", "item_id": "msg_1", "delta": "hi"}),
    ];
    let listener_url =
        spawn_trickling_sse_server(events, Duration::from_millis(50), Duration::from_secs(2));

    let mut stream = timed_adapter(
        listener_url,
        Duration::from_secs(2),
        Duration::from_millis(300),
    )
    .stream(Request::new("gpt-4.1-mini", vec![Message::user("hello")]))
    .await
    .expect("stream");
    let mut last = None;
    while let Some(event) = stream.next().await {
        last = Some(event.expect("event"));
    }

    let last = last.expect("terminal event");
    assert_eq!(last.event_type, StreamEventType::Error);
    match last.error {
        Some(SDKError::Stream(message)) => assert!(message.contains("no data"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}
