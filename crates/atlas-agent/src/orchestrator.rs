//! Bounded generate/dispatch loop.
//!
//! Each cycle streams one turn from the generation service, forwards its
//! text deltas to the client as they arrive, and once the turn is final
//! answers every tool call it requested, in emission order, before the next
//! cycle. The loop ends when a turn requests no tools or the iteration
//! ceiling is reached; either way the client gets one terminal event.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use atlas_llm::{
    Message, ProviderAdapter, Request, Response, ResponseSeed, SDKError, StreamAccumulator,
    StreamEventType, ToolCall, ToolDefinition,
};
use futures::StreamExt;
use futures::channel::mpsc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::code_tool::CodeTool;
use crate::errors::DispatchError;
use crate::prompts::{ANALYZE_DATA_DESCRIPTION, ORCHESTRATOR_INSTRUCTIONS, WEB_RESEARCH_DESCRIPTION};
use crate::protocol::{ChatEvent, ChatEventStream, TokenUsage};
use crate::research_tool::ResearchTool;
use crate::sanitize::strip_inline_images;

/// What a tool hands back: the text folded into the conversation, and an
/// optional block shown to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub model_text: String,
    pub client_text: Option<String>,
}

/// A capability the generation service may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Value) -> Result<ToolOutput, DispatchError>;
}

#[derive(Deserialize)]
struct QueryArguments {
    query: String,
}

fn query_definition(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to do, in plain language."}
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

fn parse_query(tool: &str, arguments: Value) -> Result<String, DispatchError> {
    serde_json::from_value::<QueryArguments>(arguments)
        .map(|args| args.query)
        .map_err(|err| DispatchError::InvalidArguments {
            tool: tool.to_string(),
            reason: err.to_string(),
        })
}

/// `analyze_data`: the code tool bound to this request's uploaded files.
pub struct AnalyzeDataTool {
    code: Arc<CodeTool>,
    files: BTreeMap<String, String>,
}

impl AnalyzeDataTool {
    pub const NAME: &'static str = "analyze_data";

    pub fn new(code: Arc<CodeTool>, files: BTreeMap<String, String>) -> Self {
        Self { code, files }
    }
}

#[async_trait]
impl Tool for AnalyzeDataTool {
    fn definition(&self) -> ToolDefinition {
        query_definition(Self::NAME, ANALYZE_DATA_DESCRIPTION)
    }

    async fn call(&self, arguments: Value) -> Result<ToolOutput, DispatchError> {
        let query = parse_query(Self::NAME, arguments)?;
        let run = self
            .code
            .run(&query, &self.files)
            .await
            .map_err(|source| DispatchError::Tool {
                tool: Self::NAME.to_string(),
                source,
            })?;
        let block = run.render_block();
        Ok(ToolOutput {
            model_text: strip_inline_images(&block).into_owned(),
            client_text: Some(block),
        })
    }
}

/// `web_research`: one cited web-search synthesis.
pub struct WebResearchTool {
    research: Arc<ResearchTool>,
}

impl WebResearchTool {
    pub const NAME: &'static str = "web_research";

    pub fn new(research: Arc<ResearchTool>) -> Self {
        Self { research }
    }
}

#[async_trait]
impl Tool for WebResearchTool {
    fn definition(&self) -> ToolDefinition {
        query_definition(Self::NAME, WEB_RESEARCH_DESCRIPTION)
    }

    async fn call(&self, arguments: Value) -> Result<ToolOutput, DispatchError> {
        let query = parse_query(Self::NAME, arguments)?;
        let text = self
            .research
            .run(&query)
            .await
            .map_err(|source| DispatchError::Tool {
                tool: Self::NAME.to_string(),
                source,
            })?;
        Ok(ToolOutput {
            client_text: Some(format!("\n**Sources / research**\n\n{text}\n\n")),
            model_text: text,
        })
    }
}

/// Message history of one run. Entries are only ever appended.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conversation {
    entries: Vec<Message>,
}

impl Conversation {
    pub fn new(instructions: &str, messages: Vec<Message>) -> Self {
        let mut entries = Vec::with_capacity(messages.len() + 1);
        entries.push(Message::system(instructions));
        entries.extend(messages);
        Self { entries }
    }

    pub fn push(&mut self, message: Message) {
        self.entries.push(message);
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub model: String,
    pub instructions: String,
    /// Ceiling on generation calls per run.
    pub max_iterations: usize,
    pub max_tokens: Option<u64>,
    pub reasoning_effort: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            instructions: ORCHESTRATOR_INSTRUCTIONS.to_string(),
            max_iterations: 5,
            max_tokens: None,
            reasoning_effort: None,
        }
    }
}

/// The generate/dispatch loop over an arbitrary tool set.
#[derive(Clone)]
pub struct ToolLoop {
    provider: Arc<dyn ProviderAdapter>,
    config: OrchestratorConfig,
}

impl ToolLoop {
    pub fn new(provider: Arc<dyn ProviderAdapter>, config: OrchestratorConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a run on a spawned task and return its event stream. Must be
    /// called from within a tokio runtime.
    pub fn run(&self, messages: Vec<Message>, tools: Vec<Arc<dyn Tool>>) -> ChatEventStream {
        let (tx, rx) = mpsc::unbounded();
        let this = self.clone();
        tokio::spawn(async move {
            let conversation = Conversation::new(&this.config.instructions, messages);
            let terminal = this.drive(conversation, tools, &tx).await;
            let _ = tx.unbounded_send(terminal);
        });
        Box::pin(rx)
    }

    async fn drive(
        &self,
        mut conversation: Conversation,
        tools: Vec<Arc<dyn Tool>>,
        tx: &mpsc::UnboundedSender<ChatEvent>,
    ) -> ChatEvent {
        let definitions: Vec<ToolDefinition> = tools.iter().map(|tool| tool.definition()).collect();
        let registry: HashMap<String, Arc<dyn Tool>> = definitions
            .iter()
            .map(|definition| definition.name.clone())
            .zip(tools)
            .collect();
        let ceiling = self.config.max_iterations.max(1);
        let mut usage = TokenUsage::default();

        for cycle in 1..=ceiling {
            if tx.is_closed() {
                tracing::info!(cycle, "client disconnected; not starting another turn");
                break;
            }

            let mut request =
                Request::new(self.config.model.clone(), conversation.entries().to_vec())
                    .with_tools(definitions.clone());
            request.max_tokens = self.config.max_tokens;
            request.reasoning_effort = self.config.reasoning_effort.clone();

            let turn = match self.stream_turn(request, tx).await {
                Ok(turn) => turn,
                Err(err) => {
                    tracing::warn!(cycle, error = %err, "generation turn failed");
                    return ChatEvent::error(err.message());
                }
            };
            usage = TokenUsage::from(&turn.usage);
            let calls = turn.tool_calls();
            conversation.push(turn.message);
            tracing::info!(cycle, tool_calls = calls.len(), "turn complete");
            if calls.is_empty() {
                break;
            }

            for call in &calls {
                conversation.push(self.answer(&registry, call, tx).await);
            }
            if cycle == ceiling {
                tracing::warn!(ceiling, "iteration ceiling reached; ending run");
            }
        }

        ChatEvent::Done { usage }
    }

    /// Stream one turn, forwarding text deltas, and return it once the
    /// service has signalled completion.
    async fn stream_turn(
        &self,
        request: Request,
        tx: &mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<Response, SDKError> {
        let mut accumulator = StreamAccumulator::new(ResponseSeed {
            id: String::new(),
            model: request.model.clone(),
            provider: self.provider.name().to_string(),
        });
        let mut events = self.provider.stream(request).await?;

        while let Some(event) = events.next().await {
            let event = event?;
            if event.event_type == StreamEventType::Error {
                return Err(event
                    .error
                    .unwrap_or_else(|| SDKError::stream("stream terminated with error event")));
            }
            if let Some(delta) = event.text() {
                let _ = tx.unbounded_send(ChatEvent::text(delta));
            }
            accumulator.process(&event);
        }

        if !accumulator.is_complete() {
            return Err(SDKError::stream(
                "generation stream ended before the turn completed",
            ));
        }
        Ok(accumulator.response())
    }

    /// Produce the tool-result message for one call. Failures become error
    /// results so every call id is answered.
    async fn answer(
        &self,
        registry: &HashMap<String, Arc<dyn Tool>>,
        call: &ToolCall,
        tx: &mpsc::UnboundedSender<ChatEvent>,
    ) -> Message {
        tracing::info!(tool = %call.name, call_id = %call.id, "dispatching tool call");
        match dispatch(registry, call).await {
            Ok(output) => {
                if let Some(text) = output.client_text {
                    let _ = tx.unbounded_send(ChatEvent::TextDelta(text));
                }
                Message::tool_result(call.id.clone(), output.model_text, false)
            }
            Err(err) => {
                tracing::warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    error = %err,
                    "tool call failed"
                );
                Message::tool_result(call.id.clone(), format!("Tool call failed: {err}"), true)
            }
        }
    }
}

async fn dispatch(
    registry: &HashMap<String, Arc<dyn Tool>>,
    call: &ToolCall,
) -> Result<ToolOutput, DispatchError> {
    let tool = registry
        .get(&call.name)
        .ok_or_else(|| DispatchError::UnknownTool(call.name.clone()))?;
    if let Some(raw) = &call.raw_arguments {
        return Err(DispatchError::InvalidArguments {
            tool: call.name.clone(),
            reason: format!("arguments are not valid JSON: {raw}"),
        });
    }
    tool.call(call.arguments.clone()).await
}

/// The Atlas chat orchestrator: the tool loop with the code and research
/// tools attached.
#[derive(Clone)]
pub struct Orchestrator {
    tool_loop: ToolLoop,
    code: Arc<CodeTool>,
    research: Arc<ResearchTool>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        code: Arc<CodeTool>,
        research: Arc<ResearchTool>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tool_loop: ToolLoop::new(provider, config),
            code,
            research,
        }
    }

    /// Answer `messages`, letting the analysis tool see `files`
    /// (in-sandbox name to local path or URL).
    pub fn run(&self, messages: Vec<Message>, files: BTreeMap<String, String>) -> ChatEventStream {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(AnalyzeDataTool::new(self.code.clone(), files)),
            Arc::new(WebResearchTool::new(self.research.clone())),
        ];
        self.tool_loop.run(messages, tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_starts_with_instructions() {
        let mut conversation = Conversation::new("be brief", vec![Message::user("hi")]);
        conversation.push(Message::assistant("hello"));
        let roles: Vec<_> = conversation
            .entries()
            .iter()
            .map(|message| message.role.clone())
            .collect();
        assert_eq!(
            roles,
            vec![atlas_llm::Role::System, atlas_llm::Role::User, atlas_llm::Role::Assistant]
        );
        assert_eq!(conversation.len(), 3);
    }

    #[test]
    fn query_arguments_are_required() {
        assert_eq!(
            parse_query("analyze_data", json!({"query": "mean pts"})).expect("query"),
            "mean pts"
        );
        let err = parse_query("analyze_data", json!({"q": 1})).expect_err("missing query");
        assert!(matches!(err, DispatchError::InvalidArguments { .. }));
    }

    #[test]
    fn tool_definitions_declare_a_query_parameter() {
        let definition = query_definition(WebResearchTool::NAME, WEB_RESEARCH_DESCRIPTION);
        assert_eq!(definition.name, "web_research");
        assert_eq!(definition.parameters["required"], json!(["query"]));
    }
}
