//! OpenAI / Azure OpenAI Provider
//!
//! Implements `LlmProvider` for the Chat Completions API, either against
//! OpenAI (or any compatible endpoint) or an Azure OpenAI deployment.
//! Transient failures are retried with backoff; auth and quota errors fail
//! the request immediately.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use cortex_core::config::{ProviderSettings, DEFAULT_OPENAI_BASE_URL};
use cortex_core::provider::{
    CompletionOptions, LlmProvider, LlmResponse, ModelInfo, StopReason, TokenUsage,
};
use cortex_core::retry::{classify_error, with_retry, HttpStatusError, RetryPolicy};
use cortex_core::types::{Message, MessageContent, Role, ToolCallRequest, ToolDefinition};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Endpoint {
    OpenAi {
        base_url: String,
    },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Chat Completions provider for OpenAI-compatible and Azure endpoints.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    endpoint: Endpoint,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    /// OpenAI or any compatible endpoint (Together, Groq, local servers).
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: Endpoint::OpenAi {
                base_url: base_url
                    .unwrap_or(DEFAULT_OPENAI_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
            },
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
            retry: RetryPolicy::default(),
        }
    }

    /// Azure OpenAI deployment. `model` is informational only.
    pub fn azure(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: &str,
        model: Option<&str>,
    ) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.unwrap_or(deployment).to_string(),
            endpoint: Endpoint::Azure {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                deployment: deployment.to_string(),
                api_version: api_version.to_string(),
            },
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        match settings {
            ProviderSettings::Azure {
                endpoint,
                deployment,
                api_version,
                api_key,
                model,
            } => Self::azure(endpoint, deployment, api_version, api_key, model.as_deref()),
            ProviderSettings::OpenAi {
                api_key,
                model,
                base_url,
            } => Self::new(api_key, model, Some(base_url)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    fn url(&self) -> String {
        match &self.endpoint {
            Endpoint::OpenAi { base_url } => format!("{}/v1/chat/completions", base_url),
            Endpoint::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint, deployment, api_version
            ),
        }
    }

    /// Convert internal messages to the Chat Completions wire format.
    fn build_request_body(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> Value {
        let mut api_messages: Vec<Value> = Vec::with_capacity(messages.len());

        for msg in messages {
            match (&msg.role, &msg.content) {
                (Role::System, MessageContent::Text(t)) => {
                    api_messages.push(json!({"role": "system", "content": t}));
                }
                (Role::User, MessageContent::Text(t)) => {
                    api_messages.push(json!({"role": "user", "content": t}));
                }
                (Role::Assistant, MessageContent::Text(t)) => {
                    api_messages.push(json!({"role": "assistant", "content": t}));
                }
                (Role::Assistant, MessageContent::ToolCalls(calls)) => {
                    let tc: Vec<Value> = calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": match &c.arguments {
                                        Value::String(raw) => raw.clone(),
                                        other => other.to_string(),
                                    }
                                }
                            })
                        })
                        .collect();
                    // Text and tool requests from one model reply travel as one message.
                    let merge = matches!(
                        api_messages.last(),
                        Some(last) if last["role"] == "assistant" && last.get("tool_calls").is_none()
                    );
                    if let Some(last) = api_messages.last_mut().filter(|_| merge) {
                        last["tool_calls"] = json!(tc);
                    } else {
                        api_messages.push(json!({
                            "role": "assistant",
                            "content": Value::Null,
                            "tool_calls": tc
                        }));
                    }
                }
                (Role::Tool, MessageContent::ToolResult(r)) => {
                    api_messages.push(json!({
                        "role": "tool",
                        "tool_call_id": r.tool_call_id,
                        "content": r.content
                    }));
                }
                (role, _) => {
                    debug!(?role, "skipping message with unexpected content for its role");
                }
            }
        }

        let mut body = json!({
            "messages": api_messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        if let Endpoint::OpenAi { .. } = self.endpoint {
            body["model"] = json!(self.model);
        }

        if !tools.is_empty() {
            let api_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    })
                })
                .collect();
            body["tools"] = json!(api_tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }

    async fn send(&self, url: &str, body: &Value) -> Result<Value> {
        let request = self.client.post(url).json(body);
        let request = match self.endpoint {
            Endpoint::OpenAi { .. } => request.bearer_auth(&self.api_key),
            Endpoint::Azure { .. } => request.header("api-key", &self.api_key),
        };

        let response = request.send().await.context("failed to call chat completions API")?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(HttpStatusError {
                status: status.as_u16(),
                retry_after,
                body,
            })
            .context(format!("{} API error", self.name()));
        }

        response
            .json()
            .await
            .context("chat completions response is not valid JSON")
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Arguments arrive as a JSON-encoded string. Unparseable text is passed on
/// as a string value so the dispatcher can reject it with a readable error.
fn parse_arguments(raw: Option<&str>) -> Value {
    match raw.map(str::trim) {
        None | Some("") => Value::Null,
        Some(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string())),
    }
}

fn parse_response(parsed: &Value) -> Result<LlmResponse> {
    let choice = parsed
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .context("chat completions response has no choices")?;
    let message = choice.get("message");

    let content = message
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCallRequest> = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|tc| tc.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let func = tc.get("function")?;
                    Some(ToolCallRequest {
                        id: tc.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        name: func
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or("")
                            .to_string(),
                        arguments: parse_arguments(func.get("arguments").and_then(|a| a.as_str())),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let stop_reason = match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("stop") => StopReason::EndTurn,
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("content_filter") => StopReason::ContentFilter,
        _ if !tool_calls.is_empty() => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let usage_field = |key: &str| {
        parsed
            .get("usage")
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize
    };
    let usage = TokenUsage {
        input_tokens: usage_field("prompt_tokens"),
        output_tokens: usage_field("completion_tokens"),
        total_tokens: usage_field("total_tokens"),
    };

    Ok(LlmResponse {
        content,
        tool_calls,
        stop_reason,
        usage,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        match self.endpoint {
            Endpoint::OpenAi { .. } => "openai",
            Endpoint::Azure { .. } => "azure",
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        let body = self.build_request_body(messages, tools, options);
        let url = self.url();

        debug!(
            provider = self.name(),
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "calling chat completions API"
        );

        let parsed = with_retry(&self.retry, "chat_completion", classify_error, || {
            self.send(&url, &body)
        })
        .await?;

        parse_response(&parsed)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.clone(),
            provider_name: self.name().to_string(),
        }
    }
}
