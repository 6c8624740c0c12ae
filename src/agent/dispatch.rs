//! Tool dispatch and the agentic tool-calling loop.
//!
//! Drives the LLM <-> tool round-trip: send a request, execute any tool
//! calls in the response, append results, repeat until the dispatcher
//! reports completion, the model answers in plain text, or the turn
//! budget runs out.

use tracing::debug;

use super::message::{ChatRequest, ChatResponse, assistant_tool_calls_message, tool_message};
use super::provider::LlmProvider;
use super::tool::{ToolCall, ToolResult};
use crate::error::AgentError;

/// Dispatches tool calls to local functions.
///
/// Dispatchers are synchronous and deterministic: the tools exposed to the
/// managing agent operate on an in-memory branch snapshot, never on the
/// network. A dispatcher that captures a terminal tool call reports
/// completion via [`ToolDispatcher::is_complete`] so the loop stops
/// without another model round-trip.
pub trait ToolDispatcher {
    /// Executes one tool call, returning its result.
    fn execute(&mut self, call: &ToolCall) -> ToolResult;

    /// Whether a terminal tool has been called.
    fn is_complete(&self) -> bool {
        false
    }
}

/// Runs an agentic loop: model -> tool calls -> tool results -> model ...
///
/// Terminates when the model responds without tool calls, when the
/// dispatcher reports completion, or after `max_turns` round-trips.
///
/// # Errors
///
/// Returns [`AgentError::ToolLoopExceeded`] when the model keeps
/// requesting non-terminal tools past `max_turns`. Propagates provider
/// errors.
pub async fn agentic_loop(
    provider: &dyn LlmProvider,
    request: &mut ChatRequest,
    dispatcher: &mut dyn ToolDispatcher,
    max_turns: usize,
) -> Result<ChatResponse, AgentError> {
    for turn in 0..max_turns {
        let response = provider.chat(request).await?;

        if response.tool_calls.is_empty() {
            debug!(turn, "agentic loop ended with plain text response");
            return Ok(response);
        }

        debug!(
            turn,
            tool_count = response.tool_calls.len(),
            "executing tool calls"
        );

        request
            .messages
            .push(assistant_tool_calls_message(response.tool_calls.clone()));

        for call in &response.tool_calls {
            let result = dispatcher.execute(call);
            debug!(
                tool = call.name,
                call_id = call.id,
                is_error = result.is_error,
                "tool executed"
            );
            request
                .messages
                .push(tool_message(&result.tool_call_id, &result.content));
        }

        if dispatcher.is_complete() {
            debug!(turn, "dispatcher reached terminal tool");
            return Ok(response);
        }
    }

    Err(AgentError::ToolLoopExceeded { max_turns })
}
