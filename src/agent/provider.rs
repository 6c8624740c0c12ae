//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`] /
//! [`ChatResponse`] into provider-specific API calls, keeping all
//! orchestration logic decoupled from any particular LLM vendor.

use async_trait::async_trait;

use super::message::{ChatRequest, ChatResponse};
use crate::error::AgentError;

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls, timeouts)
/// for a specific provider while presenting a uniform interface. Tool-use
/// capable providers surface tool calls on the response; plain completion
/// callers ignore that field.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. `"openrouter"`, `"anthropic"`, `"mock"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures, timeouts, or payload
    /// mapping errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;
}

/// One-shot completion helper: system prompt + user prompt -> text.
///
/// # Errors
///
/// Propagates any provider error.
pub async fn complete(
    provider: &dyn LlmProvider,
    model: &str,
    system: &str,
    prompt: &str,
    temperature: f32,
    max_tokens: Option<u32>,
) -> Result<String, AgentError> {
    let mut request = ChatRequest::simple(model, system, prompt);
    request.temperature = Some(temperature);
    request.max_tokens = max_tokens;
    let response = provider.chat(&request).await?;
    Ok(response.content)
}
