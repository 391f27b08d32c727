//! Model Client Adapter
//!
//! The `LlmProvider` trait is the only way the agent loop talks to a hosted
//! chat-completion service: a transcript plus tool descriptors in, one
//! assistant message (text and/or tool requests) out.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Message, ToolCallRequest, ToolDefinition};

// ---------------------------------------------------------------------------
// Request options
// ---------------------------------------------------------------------------

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 16_384,
            temperature: 0.7,
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Information about the model behind a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model or deployment identifier (e.g. "gpt-4o").
    pub name: String,
    /// Provider name (e.g. "azure", "openai").
    pub provider_name: String,
}

/// Token usage for a single model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ContentFilter,
}

/// One assistant message returned by `complete()`.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Text content (may be empty if only tool calls).
    pub content: String,
    /// Tool invocations requested by the model, in order.
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

impl LlmResponse {
    /// Text-only response, mostly useful for fakes.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    /// Response requesting tools and carrying no text.
    pub fn tools(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Implemented by each chat-completion backend.
///
/// Network, auth and quota failures are returned as `Err`; the agent loop
/// treats them as a failure of the current turn only.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "azure", "openai").
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> Result<LlmResponse>;

    /// Return metadata about the active model.
    fn model_info(&self) -> ModelInfo;
}
