//! Tool Dispatcher
//!
//! Resolves a tool-call request against the registry, runs the handler
//! under a timeout, and normalizes whatever happens (output, error, panic,
//! timeout) into a single `ToolResult`. Nothing a handler does can escape
//! into the agent loop as an error.

use std::borrow::Cow;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::builtin::{BuiltinRuntime, BuiltinTool};
use crate::context::AgentContext;
use crate::registry::{SharedRegistry, ToolHandler};
use crate::types::{ToolCallRequest, ToolCallResult, ToolResult};

/// Default per-call timeout for tools without their own override.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

const LOG_PREVIEW_CHARS: usize = 200;

pub struct ToolDispatcher {
    registry: SharedRegistry,
    builtins: BuiltinRuntime,
    default_timeout: Duration,
    max_result_chars: Option<usize>,
}

impl ToolDispatcher {
    pub fn new(registry: SharedRegistry, builtins: BuiltinRuntime) -> Self {
        Self {
            registry,
            builtins,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            max_result_chars: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Cap the serialized result text handed back to the model.
    pub fn with_max_result_chars(mut self, max: Option<usize>) -> Self {
        self.max_result_chars = max;
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Run one tool call and produce the transcript entry answering it.
    pub async fn execute(&self, call: &ToolCallRequest, ctx: &AgentContext) -> ToolCallResult {
        let result = self.dispatch(call, ctx).await;
        let text = result.to_text();
        let content = match self.max_result_chars {
            Some(max) => truncate_text(&text, max).into_owned(),
            None => text,
        };
        ToolCallResult {
            tool_call_id: call.id.clone(),
            content,
            is_error: !result.success,
        }
    }

    /// Run one tool call and return the normalized result.
    pub async fn dispatch(&self, call: &ToolCallRequest, ctx: &AgentContext) -> ToolResult {
        let started = Instant::now();
        info!(tool = %call.name, id = %call.id, arguments = %call.arguments, "tool call started");

        let mut result = self.run(call, ctx).await;
        let elapsed = started.elapsed();
        result.duration_ms = Some(elapsed.as_millis() as u64);

        if result.success {
            let preview = match &result.data {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            info!(
                tool = %call.name,
                duration_ms = elapsed.as_millis() as u64,
                preview = %truncate_text(&preview, LOG_PREVIEW_CHARS),
                "tool call succeeded"
            );
        } else {
            warn!(
                tool = %call.name,
                duration_ms = elapsed.as_millis() as u64,
                error = result.error.as_deref().unwrap_or(""),
                "tool call failed"
            );
        }
        result
    }

    async fn run(&self, call: &ToolCallRequest, ctx: &AgentContext) -> ToolResult {
        let arguments = match &call.arguments {
            serde_json::Value::Null => serde_json::json!({}),
            serde_json::Value::Object(_) => call.arguments.clone(),
            other => {
                return ToolResult::failure(format!(
                    "invalid arguments for tool '{}': expected a JSON object, got {}",
                    call.name,
                    json_kind(other)
                ))
            }
        };

        // Clone the handler out so the registry lock is not held while it runs.
        let handler = self.registry.read().await.handler(&call.name);
        let Some(handler) = handler else {
            return ToolResult::failure(format!("Unknown tool: {}", call.name));
        };

        let limit = match &handler {
            ToolHandler::Builtin(BuiltinTool::ExecuteCommand) => {
                self.default_timeout.max(self.builtins.command_timeout + Duration::from_secs(1))
            }
            ToolHandler::Builtin(_) => self.default_timeout,
            ToolHandler::Dynamic { handler, .. } => handler.timeout().unwrap_or(self.default_timeout),
        };
        debug!(tool = %call.name, source = %handler.source(), timeout_secs = limit.as_secs_f64(), "resolved handler");

        let fut: BoxFuture<'_, ToolResult> = match &handler {
            ToolHandler::Builtin(tool) => Box::pin(self.builtins.execute(*tool, arguments, ctx)),
            ToolHandler::Dynamic { handler, .. } => {
                let handler = handler.clone();
                let name = call.name.clone();
                Box::pin(async move {
                    match handler.call(&name, arguments, ctx).await {
                        Ok(text) => ToolResult::from_output(&text),
                        Err(e) => ToolResult::failure(format!("{:#}", e)),
                    }
                })
            }
        };

        match tokio::time::timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                ToolResult::failure(format!("tool '{}' panicked: {}", call.name, msg))
            }
            Err(_) => ToolResult::failure(format!(
                "tool '{}' timed out after {}s",
                call.name,
                limit.as_secs_f64()
            )),
        }
    }
}

/// Shorten `text` to at most `max_chars` characters plus a marker.
pub fn truncate_text(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            Cow::Owned(format!("{}...[truncated {} chars]", &text[..cut], dropped))
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::register_builtins;
    use crate::registry::ToolRegistry;
    use crate::types::ToolDefinition;
    use serde_json::json;

    fn runtime() -> BuiltinRuntime {
        BuiltinRuntime::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap()
    }

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "", json!({"type": "object"}))
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    fn dispatcher_with(reg: ToolRegistry) -> ToolDispatcher {
        ToolDispatcher::new(reg.into_shared(), runtime())
    }

    #[tokio::test]
    async fn unknown_tool_is_failure() {
        let d = dispatcher_with(ToolRegistry::new());
        let r = d.dispatch(&call("web_search", json!({})), &AgentContext::detect()).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("Unknown tool: web_search"));
        assert!(r.duration_ms.is_some());
    }

    #[tokio::test]
    async fn non_object_arguments_rejected() {
        let mut reg = ToolRegistry::new();
        register_builtins(&mut reg).unwrap();
        let d = dispatcher_with(reg);
        let r = d
            .dispatch(&call("read_file", json!("{not json")), &AgentContext::detect())
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("expected a JSON object"));
    }

    #[tokio::test]
    async fn null_arguments_become_empty_object() {
        let mut reg = ToolRegistry::new();
        register_builtins(&mut reg).unwrap();
        let d = dispatcher_with(reg);
        let ctx = AgentContext::detect().with_working_dir("/srv");
        let r = d.dispatch(&call("get_cwd", serde_json::Value::Null), &ctx).await;
        assert!(r.success);
        assert_eq!(r.data.unwrap()["cwd"], "/srv");
    }

    #[tokio::test]
    async fn reregistered_name_dispatches_to_latest_handler() {
        let mut reg = ToolRegistry::new();
        reg.register(def("x"), ToolHandler::from_fn("first", |_| async { Ok("first".to_string()) }))
            .unwrap();
        reg.register(def("x"), ToolHandler::from_fn("second", |_| async { Ok("second".to_string()) }))
            .unwrap();
        let d = dispatcher_with(reg);
        let r = d.dispatch(&call("x", json!({})), &AgentContext::detect()).await;
        assert!(r.success);
        assert_eq!(r.data, Some(json!("second")));
        assert_eq!(d.registry().read().await.descriptors().len(), 1);
    }

    #[tokio::test]
    async fn handler_error_becomes_failure() {
        let mut reg = ToolRegistry::new();
        reg.register(
            def("flaky"),
            ToolHandler::from_fn("test", |_| async { Err::<String, _>(anyhow::anyhow!("connection refused")) }),
        )
        .unwrap();
        let d = dispatcher_with(reg);
        let r = d.dispatch(&call("flaky", json!({})), &AgentContext::detect()).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let mut reg = ToolRegistry::new();
        reg.register(
            def("boom"),
            ToolHandler::from_fn("test", |_| async {
                if true {
                    panic!("handler exploded");
                }
                Ok::<_, anyhow::Error>(String::new())
            }),
        )
        .unwrap();
        let d = dispatcher_with(reg);
        let r = d.dispatch(&call("boom", json!({})), &AgentContext::detect()).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("handler exploded"));
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let mut reg = ToolRegistry::new();
        reg.register(
            def("slow"),
            ToolHandler::from_fn("test", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>("late".to_string())
            }),
        )
        .unwrap();
        let d = dispatcher_with(reg).with_timeout(Duration::from_millis(50));
        let r = d.dispatch(&call("slow", json!({})), &AgentContext::detect()).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn envelope_output_is_parsed() {
        let mut reg = ToolRegistry::new();
        reg.register(
            def("scan"),
            ToolHandler::from_fn("test", |args| async move {
                Ok::<_, anyhow::Error>(
                    json!({"success": true, "data": {"target": args["target"]}}).to_string(),
                )
            }),
        )
        .unwrap();
        let d = dispatcher_with(reg);
        let result = d
            .execute(&call("scan", json!({"target": "10.0.0.5"})), &AgentContext::detect())
            .await;
        assert!(!result.is_error);
        assert_eq!(result.tool_call_id, "call_1");
        let parsed: ToolResult = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed.data, Some(json!({"target": "10.0.0.5"})));
    }

    #[tokio::test]
    async fn result_text_truncated_when_configured() {
        let mut reg = ToolRegistry::new();
        reg.register(
            def("dump"),
            ToolHandler::from_fn("test", |_| async { Ok::<_, anyhow::Error>("x".repeat(500)) }),
        )
        .unwrap();
        let d = dispatcher_with(reg).with_max_result_chars(Some(100));
        let result = d.execute(&call("dump", json!({})), &AgentContext::detect()).await;
        assert!(result.content.contains("...[truncated"));
        assert!(result.content.len() < 200);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("ééééé", 2), "éé...[truncated 3 chars]");
    }
}
