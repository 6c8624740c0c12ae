//! OpenAI-compatible provider built on the `async-openai` crate.
//!
//! Used for the OpenRouter summarizer backend and for any other endpoint
//! that speaks the OpenAI chat completion dialect, via the base URL
//! override. The lowering into SDK types lives in small per-role
//! helpers; the assistant arm is the only interesting one, since it
//! carries the managing agent's tool-call blocks.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
    ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestSystemMessageContent,
    ChatCompletionRequestToolMessage, ChatCompletionRequestToolMessageContent,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
    ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequest,
    CreateChatCompletionResponse, FunctionCall, FunctionObject, ResponseFormat,
};
use async_trait::async_trait;

use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::LlmProvider;
use crate::agent::tool::{ToolCall, ToolDefinition};
use crate::error::AgentError;

/// Default OpenRouter endpoint.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI-compatible LLM provider.
pub struct OpenRouterProvider {
    client: Client<OpenAIConfig>,
}

impl OpenRouterProvider {
    /// Creates a provider for the given key and optional base URL
    /// (defaults to the OpenRouter endpoint).
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url.unwrap_or(OPENROUTER_BASE_URL));
        Self {
            client: Client::with_config(config),
        }
    }
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let response = self
            .client
            .chat()
            .create(build_request(request))
            .await
            .map_err(|e| AgentError::ApiRequest {
                message: e.to_string(),
                status: None,
            })?;

        Ok(into_response(response))
    }
}

// ---------------------------------------------------------------------------
// Request lowering
// ---------------------------------------------------------------------------

/// Builds the SDK request. JSON mode and tools are optional extras; the
/// rest maps field for field.
fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
    CreateChatCompletionRequest {
        model: request.model.clone(),
        messages: request.messages.iter().map(lower_message).collect(),
        temperature: request.temperature,
        max_completion_tokens: request.max_tokens,
        response_format: request.json_mode.then_some(ResponseFormat::JsonObject),
        tools: (!request.tools.is_empty())
            .then(|| request.tools.iter().map(lower_tool_definition).collect()),
        ..Default::default()
    }
}

/// Lowers one conversation message into the SDK's request shape.
fn lower_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
    match msg.role {
        Role::System => lower_system(&msg.content),
        Role::User => lower_user(&msg.content),
        Role::Assistant => lower_assistant(msg),
        Role::Tool => lower_tool_result(msg),
    }
}

fn lower_system(content: &str) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
        content: ChatCompletionRequestSystemMessageContent::Text(content.to_string()),
        name: None,
    })
}

fn lower_user(content: &str) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
        content: ChatCompletionRequestUserMessageContent::Text(content.to_string()),
        name: None,
    })
}

/// Assistant turns may carry tool calls, text, or both; empty text is
/// dropped so the API never sees an empty string next to tool calls.
// The SDK struct still spells out its deprecated function_call field.
#[allow(deprecated)]
fn lower_assistant(msg: &ChatMessage) -> ChatCompletionRequestMessage {
    let content = (!msg.content.is_empty()).then(|| {
        ChatCompletionRequestAssistantMessageContent::Text(msg.content.clone())
    });
    let tool_calls = (!msg.tool_calls.is_empty())
        .then(|| msg.tool_calls.iter().map(lower_tool_call).collect());

    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
        content,
        tool_calls,
        name: None,
        refusal: None,
        audio: None,
        function_call: None,
    })
}

fn lower_tool_result(msg: &ChatMessage) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
        content: ChatCompletionRequestToolMessageContent::Text(msg.content.clone()),
        tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
    })
}

fn lower_tool_call(call: &ToolCall) -> ChatCompletionMessageToolCall {
    ChatCompletionMessageToolCall {
        id: call.id.clone(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
    }
}

fn lower_tool_definition(def: &ToolDefinition) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: def.name.clone(),
            description: Some(def.description.clone()),
            parameters: Some(def.parameters.clone()),
            strict: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Response mapping
// ---------------------------------------------------------------------------

/// Maps the SDK response into our generic response, consuming it. A
/// response without choices yields empty content with usage preserved.
fn into_response(response: CreateChatCompletionResponse) -> ChatResponse {
    let usage = response.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    let Some(choice) = response.choices.into_iter().next() else {
        return ChatResponse {
            usage,
            ..ChatResponse::default()
        };
    };

    let stop_reason = choice
        .finish_reason
        .map(|reason| format!("{reason:?}").to_lowercase());
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        usage,
        tool_calls,
        stop_reason,
    }
}
