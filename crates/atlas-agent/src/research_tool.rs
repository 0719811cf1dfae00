use std::sync::Arc;

use atlas_llm::{Citation, Message, ProviderAdapter, Request, SDKError};

use crate::errors::ToolError;
use crate::prompts::RESEARCH_SYSTEM_PROMPT;

const WEB_SEARCH: &str = "web_search";

/// Single web-search-enabled generation call. No retries and no tool loop.
pub struct ResearchTool {
    provider: Arc<dyn ProviderAdapter>,
    model: String,
    reasoning_effort: Option<String>,
}

impl ResearchTool {
    pub fn new(provider: Arc<dyn ProviderAdapter>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            reasoning_effort: None,
        }
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    /// Cited synthesis for `query`. Citations the service reported but the
    /// text does not link are listed after it.
    pub async fn run(&self, query: &str) -> Result<String, ToolError> {
        if !self.provider.supports_builtin_tool(WEB_SEARCH) {
            return Err(SDKError::configuration(format!(
                "provider '{}' has no {WEB_SEARCH} capability",
                self.provider.name()
            ))
            .into());
        }

        let mut request = Request::new(
            self.model.clone(),
            vec![Message::system(RESEARCH_SYSTEM_PROMPT), Message::user(query)],
        )
        .with_builtin_tool(WEB_SEARCH);
        request.reasoning_effort = self.reasoning_effort.clone();

        let response = self.provider.complete(request).await?;
        let text = response.text();
        let text = text.trim();
        if text.is_empty() {
            return Err(ToolError::GenerationContract(
                "research response contained no text".into(),
            ));
        }
        tracing::debug!(citations = response.citations.len(), "research complete");
        Ok(append_missing_sources(text, &response.citations))
    }
}

fn append_missing_sources(text: &str, citations: &[Citation]) -> String {
    let missing: Vec<&Citation> = citations
        .iter()
        .filter(|citation| !text.contains(&citation.url))
        .collect();
    if missing.is_empty() {
        return text.to_string();
    }
    let mut out = format!("{text}\n\nSources:");
    for citation in missing {
        let title = citation.title.as_deref().unwrap_or(&citation.url);
        out.push_str(&format!("\n- [{title}]({})", citation.url));
    }
    out
}
