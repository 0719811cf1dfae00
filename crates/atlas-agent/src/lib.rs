//! Atlas chat orchestration.
//!
//! The [`Orchestrator`] drives a bounded generate/dispatch loop over the
//! generation service, handing tool calls to the [`CodeTool`] (generate
//! Python, run it in an execution session) and the [`ResearchTool`] (one
//! web-search-enabled generation call). Everything the client sees leaves
//! through the typed [`ChatEvent`] protocol.

pub mod code_tool;
pub mod errors;
pub mod extract;
pub mod messages;
pub mod orchestrator;
pub mod prompts;
pub mod protocol;
pub mod research_tool;
pub mod sanitize;
pub mod summary;

pub use code_tool::{BatchReport, CodeRun, CodeTool, CodeToolConfig};
pub use errors::{DispatchError, ToolError};
pub use extract::CodeFence;
pub use messages::{ClientAttachment, ClientMessage, extract_files, normalize_messages};
pub use orchestrator::{
    AnalyzeDataTool, Conversation, Orchestrator, OrchestratorConfig, Tool, ToolLoop, ToolOutput,
    WebResearchTool,
};
pub use protocol::{ChatEvent, ChatEventStream, TokenUsage, encode_event};
pub use research_tool::ResearchTool;
pub use sanitize::strip_inline_images;
pub use summary::{SummaryError, TableSummary, summarize};
