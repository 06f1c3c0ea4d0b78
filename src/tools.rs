//! Tool execution boundary and registry.
//!
//! The engine consumes a [`ToolExecutor`]: a named tool, a JSON parameter
//! bag, a JSON result. Tool implementations (cloud queries, observability
//! APIs, incident trackers) live entirely on the caller's side, including
//! their timeouts and retries. The engine treats tool errors as evidence,
//! never as fatal failures.
//!
//! The [`ToolRegistry`] carries the [`ToolDefinition`]s declared to the
//! LLM in the agent loop, plus helpers for discovering well-known
//! capabilities by name.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::ToolDefinition;

// ---------------------------------------------------------------------------
// Well-known tool names
// ---------------------------------------------------------------------------

/// Drill-down: fetch a full tool result from the scratchpad by id.
pub const TOOL_GET_FULL_RESULT: &str = "get_full_result";
/// Drill-down: list all scratchpad result ids with summaries.
pub const TOOL_LIST_RESULTS: &str = "list_results";
/// Generic skill invocation: `{name, args}`.
pub const TOOL_SKILL: &str = "skill";

/// Find an incident-fetch tool among the available names.
pub fn find_incident_tool(available: &[String]) -> Option<&str> {
    available
        .iter()
        .find(|name| name.contains("incident"))
        .map(String::as_str)
}

/// Find a knowledge-search tool among the available names.
pub fn find_knowledge_tool(available: &[String]) -> Option<&str> {
    available
        .iter()
        .find(|name| name.contains("knowledge") || name.contains("search_docs"))
        .map(String::as_str)
}

/// Find a code-search tool among the available names.
pub fn find_code_search_tool(available: &[String]) -> Option<&str> {
    available
        .iter()
        .find(|name| name.contains("code_search") || name.contains("search_code"))
        .map(String::as_str)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Errors surfaced by an injected tool executor.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// No tool registered under the requested name.
    #[error("unknown tool: {0}")]
    Unknown(String),
    /// The tool ran and failed.
    #[error("tool {tool} failed: {message}")]
    Failed {
        /// Tool that failed.
        tool: String,
        /// Failure detail.
        message: String,
    },
}

/// Injected tool execution capability.
///
/// Implementations must tolerate concurrent calls to different tool
/// names; the agent loop fans out the tool calls of a single LLM turn.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a named tool with a JSON parameter bag.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on unknown tools or execution failure. The
    /// engine records failures as evidence and continues.
    async fn execute(&self, name: &str, params: &Value) -> Result<Value, ToolError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The set of tool definitions declared to the LLM.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Create a registry from caller-supplied definitions, appending the
    /// built-in scratchpad drill-down tools.
    pub fn new(mut definitions: Vec<ToolDefinition>) -> Self {
        definitions.extend(drill_down_definitions());
        Self { definitions }
    }

    /// All definitions, drill-down tools included.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Names of all registered tools.
    pub fn names(&self) -> Vec<String> {
        self.definitions.iter().map(|d| d.name.clone()).collect()
    }

    /// Whether a tool is served locally from the scratchpad rather than
    /// dispatched to the executor.
    pub fn is_drill_down(name: &str) -> bool {
        name == TOOL_GET_FULL_RESULT || name == TOOL_LIST_RESULTS
    }

    /// One-line-per-tool description block for system prompts.
    pub fn describe(&self) -> String {
        self.definitions
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Definitions of the scratchpad drill-down tools.
fn drill_down_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: TOOL_GET_FULL_RESULT.to_owned(),
            description: "Fetch the full body of an earlier tool result by its scratchpad id. \
                          Returns null when the body has been evicted."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "scratchpad result id"}
                },
                "required": ["id"]
            }),
        },
        ToolDefinition {
            name: TOOL_LIST_RESULTS.to_owned(),
            description: "List every tool result recorded this session: id, tool, and summary."
                .to_owned(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
    ]
}
