use atlas_llm::SDKError;
use atlas_sandbox::SessionError;
use thiserror::Error;

/// Failures inside a tool invocation. The orchestrator turns every variant
/// into tool-result text; none of them stop the loop.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("generation failed: {0}")]
    Generation(#[from] SDKError),
    #[error("generated response did not honor its contract: {0}")]
    GenerationContract(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failures routing a tool call to its implementation.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("tool '{tool}' failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ToolError,
    },
}
