//! Natural-language analysis requests turned into executed Python.

use std::collections::BTreeMap;
use std::sync::Arc;

use atlas_llm::{Message, ProviderAdapter, Request};
use atlas_sandbox::{
    ArtifactSource, BackendError, ExecutionOutput, ExecutionSession, ResolvedArtifact,
    SandboxBackend, SessionError, SessionTimeouts,
};
use serde::Serialize;

use crate::errors::ToolError;
use crate::extract::CodeFence;
use crate::prompts::CODE_SYSTEM_PROMPT;
use crate::summary::summarize;

const OUTPUT_DELIMITER: &str = "---OUTPUT---";

#[derive(Clone, Debug)]
pub struct CodeToolConfig {
    pub model: String,
    pub reasoning_effort: Option<String>,
    /// `upload` also bounds fetching URL inputs, which happens once per
    /// invocation.
    pub session_timeouts: SessionTimeouts,
}

impl Default for CodeToolConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5.1".to_string(),
            reasoning_effort: None,
            session_timeouts: SessionTimeouts::default(),
        }
    }
}

/// Generated script plus what it printed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeRun {
    pub code: String,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CodeRun {
    /// Stdout lines followed by stderr lines.
    pub fn output_text(&self) -> String {
        self.stdout
            .iter()
            .chain(&self.stderr)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `python-exec` block the client splits into a code pane and an output
    /// pane at the delimiter line.
    pub fn render_block(&self) -> String {
        format!(
            "\n```python-exec\n{}\n{OUTPUT_DELIMITER}\n{}\n```\n\n",
            self.code,
            self.output_text()
        )
    }
}

/// Result of running every block found in a set of instructions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// No non-blank stderr line was produced.
    pub success: bool,
    pub code: Vec<String>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchReport {
    fn failed(code: Vec<String>, error: String) -> Self {
        Self {
            success: false,
            code,
            error: Some(error),
            ..Default::default()
        }
    }
}

pub struct CodeTool {
    provider: Arc<dyn ProviderAdapter>,
    backend: Arc<dyn SandboxBackend>,
    config: CodeToolConfig,
    http: reqwest::Client,
}

impl CodeTool {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        backend: Arc<dyn SandboxBackend>,
        config: CodeToolConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Generate one script for `query`, run it against `files`, and return
    /// the script with its output.
    pub async fn run(
        &self,
        query: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<CodeRun, ToolError> {
        let inputs = self.fetch_inputs(files).await;
        let prompt = with_file_summaries(query, &inputs);
        let mut request = Request::new(
            self.config.model.clone(),
            vec![Message::system(CODE_SYSTEM_PROMPT), Message::user(prompt)],
        );
        request.reasoning_effort = self.config.reasoning_effort.clone();

        let response = self.provider.complete(request).await?;
        let text = response.text();
        let code = CodeFence::python()
            .first(&text)
            .ok_or_else(|| {
                ToolError::GenerationContract("response contained no python code block".into())
            })?
            .to_string();
        tracing::debug!(model = %response.model, bytes = code.len(), "generated analysis script");

        let output = self.execute(inputs, std::slice::from_ref(&code)).await?;
        Ok(CodeRun {
            code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Run every fenced block in `instructions` in one session, in order.
    /// Never fails; problems are reported in the returned value.
    ///
    /// This is a library entry point for callers that already hold code.
    /// The chat orchestrator does not declare it as a tool; its analysis
    /// tool goes through [`CodeTool::run`].
    pub async fn execute_blocks(
        &self,
        instructions: &str,
        files: &BTreeMap<String, String>,
    ) -> BatchReport {
        let blocks: Vec<String> = CodeFence::python_or_bare()
            .all(instructions)
            .into_iter()
            .map(str::to_string)
            .collect();
        if blocks.is_empty() {
            return BatchReport::failed(
                Vec::new(),
                "No executable code found in instructions".to_string(),
            );
        }

        tracing::info!(blocks = blocks.len(), "executing code blocks");
        let inputs = self.fetch_inputs(files).await;
        match self.execute(inputs, &blocks).await {
            Ok(output) => BatchReport {
                success: !output.has_errors(),
                code: blocks,
                stdout: output.stdout,
                stderr: output.stderr,
                error: None,
            },
            Err(err) => BatchReport::failed(blocks, format!("Execution failed: {err}")),
        }
    }

    /// Read or download every input once, in name order.
    async fn fetch_inputs(&self, files: &BTreeMap<String, String>) -> Vec<Input> {
        let mut inputs = Vec::with_capacity(files.len());
        for (name, source) in files {
            let artifact = ArtifactSource::parse(source)
                .resolve(name, &self.http, self.config.session_timeouts.upload)
                .await;
            inputs.push(Input {
                name: name.clone(),
                artifact,
            });
        }
        inputs
    }

    /// Inputs that failed to resolve fail the run before any sandbox is
    /// allocated.
    async fn execute(
        &self,
        inputs: Vec<Input>,
        snippets: &[String],
    ) -> Result<ExecutionOutput, SessionError> {
        let artifacts = inputs
            .into_iter()
            .map(|input| input.artifact)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| SessionError::Initialization(err.to_string()))?;
        let mut session = ExecutionSession::new(self.backend.clone())
            .with_timeouts(self.config.session_timeouts)
            .with_http_client(self.http.clone());
        let result = run_snippets(&mut session, artifacts, snippets).await;
        session.close().await;
        result
    }
}

struct Input {
    name: String,
    artifact: Result<ResolvedArtifact, BackendError>,
}

impl Input {
    fn describe(&self) -> String {
        let summary = match &self.artifact {
            Ok(artifact) => summarize(&self.name, &artifact.bytes).map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match summary {
            Ok(summary) => summary.to_string(),
            Err(reason) => {
                tracing::warn!(file = %self.name, %reason, "could not summarize file");
                format!("File: {}\nSummary unavailable: {reason}\n", self.name)
            }
        }
    }
}

fn with_file_summaries(query: &str, inputs: &[Input]) -> String {
    if inputs.is_empty() {
        return query.to_string();
    }
    let mut prompt = format!("{query}\n\nFiles available in the working directory:\n");
    for input in inputs {
        prompt.push('\n');
        prompt.push_str(&input.describe());
    }
    prompt
}

async fn run_snippets(
    session: &mut ExecutionSession,
    artifacts: Vec<ResolvedArtifact>,
    snippets: &[String],
) -> Result<ExecutionOutput, SessionError> {
    session.init_with(artifacts).await?;
    let mut combined = ExecutionOutput::default();
    for snippet in snippets {
        let output = session.run(snippet).await?;
        combined.stdout.extend(output.stdout);
        combined.stderr.extend(output.stderr);
    }
    Ok(combined)
}
