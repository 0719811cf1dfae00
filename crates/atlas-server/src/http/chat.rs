use atlas_agent::{ClientMessage, encode_event, extract_files, normalize_messages};
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;

const DATA_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-data-stream");

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ClientMessage>,
}

/// `POST /api/chat`: run the orchestrator and stream its protocol lines.
pub async fn handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let request_id = Uuid::new_v4();
    let messages = normalize_messages(&request.messages);
    let files = extract_files(&request.messages, &state.upload_dir);
    tracing::info!(
        %request_id,
        messages = messages.len(),
        files = files.len(),
        "chat request"
    );

    let lines = state.orchestrator.run(messages, files).map(move |event| {
        if event.is_terminal() {
            tracing::info!(%request_id, ?event, "chat stream finished");
        }
        encode_event(&event).map(Bytes::from)
    });

    (
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (DATA_STREAM_HEADER, HeaderValue::from_static("v1")),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}
