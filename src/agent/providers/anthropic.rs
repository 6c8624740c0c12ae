//! Anthropic Messages API provider.
//!
//! Used for the managing agent's reasoning model. Speaks the Messages API
//! directly over `reqwest`: system messages collapse into the `system`
//! field, assistant tool calls become `tool_use` blocks, and tool results
//! are sent back as `tool_result` blocks inside a user turn.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agent::message::{ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::LlmProvider;
use crate::agent::tool::ToolCall;
use crate::error::AgentError;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// LLM completion timeout.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);
/// Messages API requires max_tokens; used when the request leaves it unset.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Creates a provider for the given key and optional base URL.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiRequest`] if the HTTP client cannot be
    /// constructed.
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(COMPLETION_TIMEOUT)
            .build()
            .map_err(|e| AgentError::ApiRequest {
                message: format!("failed to build http client: {e}"),
                status: None,
            })?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or(ANTHROPIC_BASE_URL).to_string(),
        })
    }

    /// Builds the Messages API body from our generic request.
    ///
    /// System messages are concatenated into the top-level `system` field;
    /// tool-result messages become `tool_result` content blocks in a user
    /// turn, as the API requires.
    fn build_body(request: &ChatRequest) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User => messages.push(json!({
                    "role": "user",
                    "content": msg.content,
                })),
                Role::Assistant => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        let input: Value = serde_json::from_str(&call.arguments)
                            .unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": input,
                        }));
                    }
                    messages.push(json!({"role": "assistant", "content": blocks}));
                }
                Role::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content,
                    });
                    messages.push(json!({"role": "user", "content": [block]}));
                }
            }
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|td| {
                    json!({
                        "name": td.name,
                        "description": td.description,
                        "input_schema": td.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }

    /// Maps the Messages API response into our generic response.
    fn parse_response(raw: &str) -> Result<ChatResponse, AgentError> {
        let parsed: MessagesResponse =
            serde_json::from_str(raw).map_err(|e| AgentError::ResponseParse {
                message: format!("invalid messages response: {e}"),
                content: raw.to_string(),
            })?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&text);
                }
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    });
                }
            }
        }

        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| {
            let prompt = u.input_tokens.unwrap_or(0);
            let completion = u.output_tokens.unwrap_or(0);
            TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        });

        Ok(ChatResponse {
            content,
            usage,
            tool_calls,
            stop_reason: parsed.stop_reason,
        })
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let body = Self::build_body(request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ApiRequest {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| AgentError::ApiRequest {
            message: format!("failed to read response body: {e}"),
            status: Some(status.as_u16()),
        })?;

        if !status.is_success() {
            return Err(AgentError::ApiRequest {
                message: text.chars().take(500).collect(),
                status: Some(status.as_u16()),
            });
        }

        Self::parse_response(&text)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::message::{assistant_tool_calls_message, system_message, tool_message, user_message};
    use crate::agent::tool::ToolDefinition;

    #[test]
    fn test_build_body_collapses_system() {
        let request = ChatRequest {
            model: "model-y".to_string(),
            messages: vec![system_message("a"), system_message("b"), user_message("q")],
            temperature: Some(0.3),
            max_tokens: Some(1024),
            json_mode: false,
            tools: Vec::new(),
        };
        let body = AnthropicProvider::build_body(&request);
        assert_eq!(body["system"], "a\n\nb");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"].as_array().map_or(0, Vec::len), 1);
    }

    #[test]
    fn test_build_body_tool_round_trip_shapes() {
        let request = ChatRequest {
            model: "model-y".to_string(),
            messages: vec![
                user_message("q"),
                assistant_tool_calls_message(vec![ToolCall {
                    id: "toolu_1".to_string(),
                    name: "cluster_papers".to_string(),
                    arguments: r#"{"criterion":"topic"}"#.to_string(),
                }]),
                tool_message("toolu_1", "{\"groups\":[]}"),
            ],
            temperature: None,
            max_tokens: None,
            json_mode: false,
            tools: vec![ToolDefinition {
                name: "cluster_papers".to_string(),
                description: "d".to_string(),
                parameters: json!({"type": "object"}),
            }],
        };
        let body = AnthropicProvider::build_body(&request);
        let messages = body["messages"].as_array().map(Vec::as_slice).unwrap_or_default();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_parse_response_text_and_tool_use() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "id": "toolu_2", "name": "make_branch_decision",
                 "input": {"action": "continue", "reasoning": "coherent"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 120, "output_tokens": 40}
        }"#;
        let response = AnthropicProvider::parse_response(raw)
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(response.content, "thinking");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "make_branch_decision");
        assert_eq!(response.usage.total_tokens, 160);
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        assert!(AnthropicProvider::parse_response("not json").is_err());
    }
}
