//! LLM client abstraction consumed by the engine.
//!
//! Defines the [`LlmClient`] trait and the shared message types. The crate
//! implements no provider — callers inject a client that speaks to their
//! LLM of choice. Two capabilities are distinguished:
//!
//! - [`LlmClient::complete`] — prompt in, free text out. Used by the
//!   orchestrator, whose [`parser`] extracts structured records from the
//!   response.
//! - [`LlmClient::chat`] — message list plus tool schema in, text and tool
//!   calls out. Used by the agent loop. The default implementation reports
//!   [`LlmError::ChatUnsupported`], so completion-only clients can still
//!   drive the orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod parser;
pub mod prompts;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message.
    System,
    /// Human user message.
    User,
    /// Assistant (LLM) message.
    Assistant,
}

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Message content — may be text or structured (tool calls/results).
    pub content: MessageContent,
}

impl Message {
    /// Convenience constructor for a plain text message.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }
}

/// The content of a message — text or structured parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Structured content blocks (text, tool calls, tool results).
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Extract plain text from the content, joining all text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// A single structured content part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Tool call requested by the assistant.
    ToolUse {
        /// Unique call identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input as JSON.
        input: serde_json::Value,
    },
    /// Result of a tool call, fed back to the assistant.
    ToolResult {
        /// Matching call identifier.
        tool_use_id: String,
        /// Result content (compact summary, never the full body).
        content: String,
        /// Whether the tool reported an error.
        is_error: bool,
    },
}

/// A tool call extracted from a chat response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call identifier assigned by the LLM.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input as JSON.
    pub arguments: serde_json::Value,
}

/// JSON Schema definition for a tool the LLM can call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match executor registration).
    pub name: String,
    /// Description shown to the LLM.
    pub description: String,
    /// JSON Schema object for the tool's parameters.
    pub input_schema: serde_json::Value,
}

/// The response from a chat-capable LLM client.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Assistant text content, possibly empty when only tools were called.
    pub content: String,
    /// Tool calls requested this turn, in response order.
    pub tool_calls: Vec<ToolCall>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by an injected LLM client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The client cannot satisfy the request (auth, quota, connectivity).
    #[error("LLM request failed: {0}")]
    Request(String),
    /// The client does not implement the chat capability.
    #[error("LLM client does not support chat with tools")]
    ChatUnsupported,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// LLM capability consumed by the engine.
///
/// Implementations must be `Send + Sync`; calls are suspension points and
/// may take arbitrarily long. Retries and timeouts are the client's
/// responsibility.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Request a free-text completion for a single prompt.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Request`] on client failure.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Request a chat turn over a message list with a tool schema.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ChatUnsupported`] unless overridden.
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let _ = (messages, tools);
        Err(LlmError::ChatUnsupported)
    }
}
