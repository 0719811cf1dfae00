//! E2B code-interpreter backend.
//!
//! Sandboxes are allocated through the control API and then addressed
//! directly: port 49983 serves the file API, port 49999 the code
//! interpreter. Execution results arrive as newline-delimited JSON events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::backend::{ExecutionOutput, SandboxBackend, SandboxHandle};
use crate::errors::BackendError;

const FILES_PORT: u16 = 49983;
const INTERPRETER_PORT: u16 = 49999;

#[derive(Clone, Debug)]
pub struct E2bConfig {
    pub api_key: String,
    pub api_url: String,
    pub domain: String,
    pub template: String,
    /// Lifetime the control plane grants a sandbox before reaping it.
    pub sandbox_timeout: Duration,
    pub connect_timeout: Duration,
    /// Replaces `https://<port>-<id>.<domain>` for both in-sandbox APIs.
    pub sandbox_base_url: Option<String>,
}

impl E2bConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: "https://api.e2b.dev".to_string(),
            domain: "e2b.app".to_string(),
            template: "code-interpreter-v1".to_string(),
            sandbox_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            sandbox_base_url: None,
        }
    }

    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("E2B_API_KEY").ok()?;
        let mut config = Self::new(api_key);
        if let Ok(api_url) = std::env::var("E2B_API_URL") {
            config.api_url = api_url;
        }
        if let Ok(domain) = std::env::var("E2B_DOMAIN") {
            config.domain = domain;
        }
        Some(config)
    }
}

#[derive(Clone)]
pub struct E2bBackend {
    client: reqwest::Client,
    config: Arc<E2bConfig>,
}

impl std::fmt::Debug for E2bBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2bBackend")
            .field("api_url", &self.config.api_url)
            .field("domain", &self.config.domain)
            .field("template", &self.config.template)
            .finish()
    }
}

impl E2bBackend {
    pub fn new(config: E2bConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    fn control_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSandbox {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
    #[serde(default)]
    domain: Option<String>,
}

#[async_trait]
impl SandboxBackend for E2bBackend {
    fn name(&self) -> &str {
        "e2b"
    }

    async fn create(&self) -> Result<Box<dyn SandboxHandle>, BackendError> {
        let body = json!({
            "templateID": self.config.template,
            "timeout": self.config.sandbox_timeout.as_secs(),
        });
        let response = self
            .client
            .post(self.control_url("/sandboxes"))
            .header("X-API-Key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let created: CreatedSandbox = response
            .json()
            .await
            .map_err(|err| BackendError::Protocol(format!("decode sandbox: {err}")))?;

        tracing::debug!(sandbox = %created.sandbox_id, "e2b sandbox created");
        Ok(Box::new(E2bSandbox {
            id: created.sandbox_id,
            access_token: created.envd_access_token,
            domain: created.domain.unwrap_or_else(|| self.config.domain.clone()),
            client: self.client.clone(),
            config: self.config.clone(),
        }))
    }
}

struct E2bSandbox {
    id: String,
    access_token: Option<String>,
    domain: String,
    client: reqwest::Client,
    config: Arc<E2bConfig>,
}

impl E2bSandbox {
    fn sandbox_url(&self, port: u16, path: &str) -> String {
        match &self.config.sandbox_base_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
            None => format!("https://{port}-{}.{}{path}", self.id, self.domain),
        }
    }

    fn control_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.header("X-Access-Token", token),
            None => request,
        }
    }
}

#[async_trait]
impl SandboxHandle for E2bSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, name: &str, bytes: Vec<u8>) -> Result<(), BackendError> {
        let form = Form::new().part("file", Part::bytes(bytes).file_name(name.to_string()));
        let request = self
            .client
            .post(self.sandbox_url(FILES_PORT, "/files"))
            .query(&[("path", name), ("username", "user")])
            .multipart(form);
        let response = self.authorize(request).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn run(&self, code: &str) -> Result<ExecutionOutput, BackendError> {
        let request = self
            .client
            .post(self.sandbox_url(INTERPRETER_PORT, "/execute"))
            .json(&json!({ "code": code, "language": "python" }));
        let response = self.authorize(request).send().await?;
        let response = check_status(response).await?;
        let body = response.text().await?;
        parse_execution_events(&body)
    }

    async fn destroy(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.control_url(&format!("/sandboxes/{}", self.id)))
            .header("X-API-Key", &self.config.api_key)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|json| json.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    Err(BackendError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Fold the interpreter's event stream into stdout/stderr lines.
///
/// PNG results become inline markdown images on stdout. An exception raised
/// by the snippet is written to stderr as `Name: value` followed by the
/// traceback.
pub fn parse_execution_events(body: &str) -> Result<ExecutionOutput, BackendError> {
    let mut stdout = String::new();
    let mut stderr = String::new();

    for line in body.lines().filter(|line| !line.trim().is_empty()) {
        let event: Value = serde_json::from_str(line)
            .map_err(|err| BackendError::Protocol(format!("invalid execution event: {err}")))?;
        match str_field(&event, "type") {
            Some("stdout") => stdout.push_str(str_field(&event, "text").unwrap_or_default()),
            Some("stderr") => stderr.push_str(str_field(&event, "text").unwrap_or_default()),
            Some("result") => {
                if let Some(png) = str_field(&event, "png") {
                    push_record(&mut stdout, &format!("![chart](data:image/png;base64,{png})"));
                } else if event.get("is_main_result").and_then(Value::as_bool) == Some(true) {
                    if let Some(value) = str_field(&event, "text") {
                        push_record(&mut stdout, value);
                    }
                }
            }
            Some("error") => {
                let name = str_field(&event, "name").unwrap_or("Error");
                let value = str_field(&event, "value").unwrap_or_default();
                push_record(&mut stderr, &format!("{name}: {value}"));
                if let Some(traceback) = str_field(&event, "traceback") {
                    push_record(&mut stderr, traceback);
                }
            }
            _ => {}
        }
    }

    Ok(ExecutionOutput {
        stdout: stdout.lines().map(str::to_string).collect(),
        stderr: stderr.lines().map(str::to_string).collect(),
    })
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Stream text is appended as printed; records always occupy whole lines.
fn push_record(buffer: &mut String, record: &str) {
    if !buffer.is_empty() && !buffer.ends_with('\n') {
        buffer.push('\n');
    }
    buffer.push_str(record);
    if !record.ends_with('\n') {
        buffer.push('\n');
    }
}
