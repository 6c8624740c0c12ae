//! Provider-agnostic LLM plumbing.
//!
//! Messages and tools are generic vocabulary types; [`provider::LlmProvider`]
//! abstracts the transport; [`dispatch::agentic_loop`] drives the
//! tool-calling round-trip that the managing agent is built on.

pub mod dispatch;
pub mod message;
pub mod provider;
pub mod providers;
pub mod tool;

pub use dispatch::{ToolDispatcher, agentic_loop};
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use provider::{LlmProvider, complete};
pub use tool::{ToolCall, ToolDefinition, ToolResult, ToolSet};
