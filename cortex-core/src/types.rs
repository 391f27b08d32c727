//! Core Data Types
//!
//! Conversation messages, tool-call requests/results, tool descriptors and
//! the uniform `ToolResult` envelope every tool invocation is normalized to.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// A message in the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCalls(calls),
        }
    }

    pub fn tool_result(result: ToolCallResult) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult(result),
        }
    }

    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content: text, tool calls, or a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
    ToolResult(ToolCallResult),
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Invocation id assigned by the model, unique within one assistant turn.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

/// The transcript entry answering one `ToolCallRequest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    /// The invocation id this result corresponds to.
    pub tool_call_id: String,
    /// Serialized `ToolResult`.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

/// A tool descriptor advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name, unique across built-ins and all loaded plugins.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Uniform outcome of a tool invocation.
///
/// `data` carries the tool-specific payload on success; `error` the failure
/// description otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    /// Failure that still carries partial output (e.g. stderr of a failed command).
    pub fn failure_with(error: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    /// Interpret handler output text.
    ///
    /// A JSON object with a boolean `success` field is taken as the envelope
    /// (any other fields become the payload); anything else is a successful
    /// result whose payload is the raw text.
    pub fn from_output(text: &str) -> Self {
        if let Ok(serde_json::Value::Object(mut map)) = serde_json::from_str(text.trim()) {
            if let Some(success) = map.get("success").and_then(|s| s.as_bool()) {
                map.remove("success");
                let error = match map.remove("error") {
                    Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
                    Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => None,
                    Some(other) => Some(other.to_string()),
                };
                let data = if let Some(inner) = map.remove("data") {
                    Some(inner)
                } else if map.is_empty() {
                    None
                } else {
                    Some(serde_json::Value::Object(map))
                };
                return Self {
                    success,
                    data,
                    error: if success { error } else { error.or_else(|| Some("tool reported failure".into())) },
                    duration_ms: None,
                };
            }
        }
        Self::ok(serde_json::Value::String(text.to_string()))
    }

    /// Serialize for the transcript.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!("{{\"success\":false,\"error\":\"unserializable tool result: {}\"}}", e)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
