//! Scripted mock provider for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::agent::message::{ChatRequest, ChatResponse};
use crate::agent::provider::LlmProvider;
use crate::error::AgentError;

/// Provider that replays a fixed script of responses.
///
/// Each `chat` call pops the next scripted response; once the script is
/// exhausted it returns a canned text response so orchestration paths
/// that make an unpredictable number of calls keep working. Requests are
/// recorded for assertion.
#[derive(Debug, Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
    /// Content returned after the script runs out.
    fallback: String,
}

impl MockProvider {
    /// A provider that always answers with `fallback` text.
    #[must_use]
    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback: fallback.into(),
        }
    }

    /// A provider that replays `responses` in order.
    #[must_use]
    pub fn with_responses(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            fallback: "mock response".to_string(),
        }
    }

    /// Number of chat calls observed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().map_or(0, |reqs| reqs.len())
    }

    /// Copies of all observed requests.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map_or_else(|_| Vec::new(), |r| r.clone())
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let scripted = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        Ok(scripted.unwrap_or_else(|| ChatResponse::text(self.fallback.clone())))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_script_then_fallback() {
        let provider = MockProvider::with_responses(vec![
            ChatResponse::text("first"),
            ChatResponse::text("second"),
        ]);
        let request = ChatRequest::simple("m", "s", "u");

        let r1 = provider
            .chat(&request)
            .await
            .unwrap_or_else(|e| panic!("chat: {e}"));
        let r2 = provider
            .chat(&request)
            .await
            .unwrap_or_else(|e| panic!("chat: {e}"));
        let r3 = provider
            .chat(&request)
            .await
            .unwrap_or_else(|e| panic!("chat: {e}"));

        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
        assert_eq!(r3.content, "mock response");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_records_requests() {
        let provider = MockProvider::with_fallback("ok");
        let request = ChatRequest::simple("model-z", "sys", "what?");
        let _ = provider.chat(&request).await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "model-z");
    }
}
