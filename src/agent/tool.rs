//! Tool type definitions for LLM function-calling.
//!
//! Provides provider-agnostic types for tool definitions, calls, and
//! results, plus the fixed tool schema the managing agent is driven by:
//! `cluster_papers`, `get_branch_context`, and the terminal
//! `make_branch_decision`.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the dispatcher's table).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call (assigned by the provider).
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments for the tool.
    pub arguments: String,
}

/// The result of executing a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result corresponds to.
    pub tool_call_id: String,
    /// Result content (JSON string on success, error message on failure).
    pub content: String,
    /// Whether this result represents an error.
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result.
    #[must_use]
    pub fn ok(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            content: content.into(),
            is_error: false,
        }
    }

    /// An error result (fed back to the model, not raised).
    #[must_use]
    pub fn error(tool_call_id: &str, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// A set of tool definitions scoped to an agent role.
///
/// The managing agent gets all three branch tools; the summarizer-side
/// agents (selection, summarization, hypothesis) get none and receive
/// their context directly in the prompt.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    definitions: Vec<ToolDefinition>,
}

impl ToolSet {
    /// Returns the tool definitions in this set.
    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Returns `true` if this set contains no tools.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Returns the number of tools in this set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Tool set for the managing agent: `cluster_papers`,
    /// `get_branch_context`, `make_branch_decision`.
    #[must_use]
    pub fn managing_agent_tools() -> Self {
        Self {
            definitions: vec![
                def_cluster_papers(),
                def_get_branch_context(),
                def_make_branch_decision(),
            ],
        }
    }

    /// Empty tool set (no tools available).
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Tool schema definitions
// ---------------------------------------------------------------------------

/// Defines the `cluster_papers` tool.
fn def_cluster_papers() -> ToolDefinition {
    ToolDefinition {
        name: "cluster_papers".to_string(),
        description: "Group the branch's accumulated papers along one criterion. Returns the \
                       groups as JSON (label plus paper IDs) computed deterministically from \
                       paper metadata. Call this to see whether coherent sub-directions exist \
                       before deciding on a split."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "criterion": {
                    "type": "string",
                    "enum": ["topic", "methodology", "time_period", "application", "citation_network"],
                    "description": "Dimension to cluster along."
                }
            },
            "required": ["criterion"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `get_branch_context` tool.
fn def_get_branch_context() -> ToolDefinition {
    ToolDefinition {
        name: "get_branch_context".to_string(),
        description: "Retrieve the branch's local context: query, iteration history, context \
                       utilization, and optionally summaries of sibling branches."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "include_siblings": {
                    "type": "boolean",
                    "description": "Include sibling branch summaries when available. Defaults to false.",
                    "default": false
                }
            },
            "additionalProperties": false
        }),
    }
}

/// Defines the `make_branch_decision` tool (terminal).
fn def_make_branch_decision() -> ToolDefinition {
    ToolDefinition {
        name: "make_branch_decision".to_string(),
        description: "Commit your decision for this branch. This ends the evaluation. For \
                       'split', supply split_config with at least two groups; every paper_id \
                       must belong to the branch."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["continue", "split", "wrap_up"],
                    "description": "What should happen to the branch."
                },
                "reasoning": {
                    "type": "string",
                    "description": "Why this action is right, grounded in the branch content."
                },
                "split_config": {
                    "type": "object",
                    "properties": {
                        "num_branches": {
                            "type": "integer",
                            "minimum": 2,
                            "maximum": 4,
                            "description": "Number of child branches to create."
                        },
                        "criteria": {
                            "type": "string",
                            "enum": [
                                "by_topic", "by_methodology", "by_time_period",
                                "by_application", "by_theoretical_framework",
                                "by_data_type", "custom"
                            ],
                            "description": "Dimension the split follows."
                        },
                        "branches": {
                            "type": "array",
                            "minItems": 2,
                            "items": {
                                "type": "object",
                                "properties": {
                                    "label": {
                                        "type": "string",
                                        "description": "Human-readable label for this group."
                                    },
                                    "query": {
                                        "type": "string",
                                        "description": "Refined search query for this direction."
                                    },
                                    "focus": {
                                        "type": "string",
                                        "description": "One-line statement of what this branch explores."
                                    },
                                    "paper_ids": {
                                        "type": "array",
                                        "items": { "type": "string" },
                                        "description": "Paper IDs assigned to this group."
                                    }
                                },
                                "required": ["label", "query", "paper_ids"]
                            }
                        }
                    },
                    "required": ["num_branches", "criteria", "branches"]
                }
            },
            "required": ["action", "reasoning"],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managing_agent_toolset() {
        let ts = ToolSet::managing_agent_tools();
        assert_eq!(ts.len(), 3);
        let names: Vec<&str> = ts.definitions().iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"cluster_papers"));
        assert!(names.contains(&"get_branch_context"));
        assert!(names.contains(&"make_branch_decision"));
    }

    #[test]
    fn test_toolset_none() {
        let ts = ToolSet::none();
        assert!(ts.is_empty());
        assert_eq!(ts.len(), 0);
    }

    #[test]
    fn test_all_definitions_have_object_schemas() {
        for def in ToolSet::managing_agent_tools().definitions() {
            assert!(!def.name.is_empty());
            assert!(!def.description.is_empty());
            assert!(def.parameters.is_object());
            assert_eq!(def.parameters["type"], "object");
        }
    }

    #[test]
    fn test_tool_result_constructors() {
        let ok = ToolResult::ok("c1", "{\"groups\":[]}");
        assert!(!ok.is_error);
        assert_eq!(ok.tool_call_id, "c1");

        let err = ToolResult::error("c2", "unknown tool");
        assert!(err.is_error);
    }

    #[test]
    fn test_decision_schema_actions() {
        let def = def_make_branch_decision();
        let actions = def.parameters["properties"]["action"]["enum"]
            .as_array()
            .map(Vec::len)
            .unwrap_or_default();
        assert_eq!(actions, 3);
    }
}
