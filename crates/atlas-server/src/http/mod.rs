pub mod chat;
pub mod upload;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use atlas_agent::{CodeTool, Orchestrator, ResearchTool};
use atlas_llm::OpenAIAdapter;
use atlas_sandbox::E2bBackend;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::config::AtlasConfig;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub upload_dir: Arc<PathBuf>,
    pub public_url: Arc<str>,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Wire the OpenAI adapter, the E2B backend, both tools, and the
    /// orchestrator from resolved configuration.
    pub fn from_config(config: &AtlasConfig) -> Result<Self> {
        let provider = Arc::new(
            OpenAIAdapter::new(config.openai.clone()).context("build OpenAI adapter")?,
        );
        let backend = Arc::new(E2bBackend::new(config.e2b.clone()).context("build E2B backend")?);

        let code = CodeTool::new(provider.clone(), backend, config.code.clone());
        let mut research = ResearchTool::new(provider.clone(), config.research_model.clone());
        if let Some(effort) = &config.research_reasoning {
            research = research.with_reasoning_effort(effort.clone());
        }
        let orchestrator = Orchestrator::new(
            provider,
            Arc::new(code),
            Arc::new(research),
            config.orchestrator.clone(),
        );

        Ok(Self::new(
            orchestrator,
            config.upload_dir.clone(),
            &config.public_url,
            config.max_upload_bytes,
        ))
    }

    pub fn new(
        orchestrator: Orchestrator,
        upload_dir: PathBuf,
        public_url: &str,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            upload_dir: Arc::new(upload_dir),
            public_url: Arc::from(public_url.trim_end_matches('/')),
            max_upload_bytes,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    let api = Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat::handler))
        .route("/upload", post(upload::store).layer(upload_limit))
        .route("/uploads/{name}", get(upload::fetch));
    Router::new().nest("/api", api).with_state(state)
}

pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .with_context(|| format!("serve {addr}"))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug)]
pub enum ApiError {
    Invalid(String),
    NotFound(String),
    Io(std::io::Error),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::Invalid(msg.into())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Invalid(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Io(err) => {
                tracing::error!(error = %err, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    err.to_string(),
                )
            }
        };
        let body = serde_json::json!({ "code": code, "message": message });
        (status, Json(body)).into_response()
    }
}
