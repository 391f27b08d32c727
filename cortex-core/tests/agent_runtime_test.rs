use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use cortex_core::provider::{CompletionOptions, LlmProvider, LlmResponse, ModelInfo};
use cortex_core::registry::BUILTIN_SOURCE;
use cortex_core::types::{Message, MessageContent, Role, ToolCallRequest, ToolDefinition};
use cortex_core::{AgentBuilder, CortexConfig, FileHistoryStore, TurnOutcome};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replays canned responses and records the tool names it was offered.
struct ScriptedModel {
    responses: Mutex<VecDeque<LlmResponse>>,
    offered: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            offered: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        tools: &[ToolDefinition],
        _options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        self.offered
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| LlmResponse::text("done")))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".into(),
            provider_name: "scripted".into(),
        }
    }
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

/// Write a plugin bundle whose handler echoes the tool it was invoked as.
fn write_bundle(plugins_dir: &Path, name: &str, tool: &str) {
    let dir = plugins_dir.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let manifest = json!({
        "name": name,
        "version": "1.0.0",
        "description": "test bundle",
        "author": "tests",
        "tools": [{
            "type": "function",
            "function": {
                "name": tool,
                "description": "echo the tool name",
                "parameters": {"type": "object", "properties": {"target": {"type": "string"}}}
            }
        }],
        "handler": {
            "command": "sh",
            "args": ["-c", r#"cat > /dev/null; printf '{"success":true,"data":{"tool":"%s"}}' "$CORTEX_TOOL""#]
        },
        "shutdown": {
            "command": "sh",
            "args": ["-c", "touch shutdown.marker"]
        }
    });
    std::fs::write(dir.join("plugin.json"), serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
}

fn config_with_plugins(plugins_dir: &Path) -> CortexConfig {
    let mut config = CortexConfig::default();
    config.plugins.dirs = vec![plugins_dir.to_path_buf()];
    config
}

fn tool_result_json(message: &Message) -> Value {
    match &message.content {
        MessageContent::ToolResult(r) => serde_json::from_str(&r.content).unwrap(),
        other => panic!("expected a tool result, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plugin_and_builtin_tools_in_one_turn() {
    let tmp = tempfile::tempdir().unwrap();
    let plugins_dir = tmp.path().join("plugins");
    write_bundle(&plugins_dir, "recon", "port_scan");
    let target_dir = tmp.path().join("target");
    std::fs::create_dir_all(&target_dir).unwrap();
    std::fs::write(target_dir.join("notes.txt"), "scope: 10.0.0.0/24").unwrap();

    let model = ScriptedModel::new(vec![
        LlmResponse::tools(vec![
            call("call_1", "port_scan", json!({"target": "10.0.0.5"})),
            call("call_2", "list_directory", json!({"directory_path": target_dir.to_str().unwrap()})),
        ]),
        LlmResponse::text("Host 10.0.0.5 scanned, notes.txt found."),
    ]);

    let mut runtime = AgentBuilder::new(config_with_plugins(&plugins_dir))
        .with_llm(model.clone())
        .build()
        .await
        .unwrap();

    let result = runtime.run_turn("recon 10.0.0.5", &CancellationToken::new()).await.unwrap();
    assert_eq!(result.outcome, TurnOutcome::Completed);
    assert_eq!(result.rounds, 2);
    assert_eq!(result.text.as_deref(), Some("Host 10.0.0.5 scanned, notes.txt found."));

    // user, assistant tool calls, two results, final answer
    let history = runtime.agent().history();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[2].role, Role::Tool);
    assert_eq!(history[3].role, Role::Tool);

    let scan = tool_result_json(&history[2]);
    assert_eq!(scan["success"], true);
    assert_eq!(scan["data"]["tool"], "port_scan");

    let listing = tool_result_json(&history[3]);
    assert_eq!(listing["success"], true);
    assert_eq!(listing["data"]["entries"][0]["name"], "notes.txt");

    let offered = model.offered.lock().unwrap();
    assert!(offered[0].contains(&"port_scan".to_string()));
    assert!(offered[0].contains(&"execute_command".to_string()));
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        LlmResponse::tools(vec![call("call_1", "does_not_exist", json!({}))]),
        LlmResponse::text("That tool is not available."),
    ]);

    let mut runtime = AgentBuilder::new(config_with_plugins(tmp.path()))
        .with_llm(model)
        .build()
        .await
        .unwrap();

    let result = runtime.run_turn("try it", &CancellationToken::new()).await.unwrap();
    assert_eq!(result.outcome, TurnOutcome::Completed);

    let failure = tool_result_json(&runtime.agent().history()[2]);
    assert_eq!(failure["success"], false);
    assert_eq!(failure["error"], "Unknown tool: does_not_exist");
}

#[tokio::test]
async fn history_survives_a_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let history_path = tmp.path().join("state").join("history.json");

    let mut runtime = AgentBuilder::new(config_with_plugins(tmp.path()))
        .with_llm(ScriptedModel::new(vec![LlmResponse::text("Hello, tester.")]))
        .with_history_store(Arc::new(FileHistoryStore::new(&history_path)))
        .build()
        .await
        .unwrap();
    runtime.run_turn("hi", &CancellationToken::new()).await.unwrap();
    assert!(history_path.exists());

    let restarted = AgentBuilder::new(config_with_plugins(tmp.path()))
        .with_llm(ScriptedModel::new(vec![]))
        .with_history_store(Arc::new(FileHistoryStore::new(&history_path)))
        .build()
        .await
        .unwrap();
    let history = restarted.agent().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text(), Some("hi"));
    assert_eq!(history[1].text(), Some("Hello, tester."));
}

#[tokio::test]
async fn clearing_history_forgets_saved_turns() {
    let tmp = tempfile::tempdir().unwrap();
    let history_path = tmp.path().join("history.json");

    let mut runtime = AgentBuilder::new(config_with_plugins(tmp.path()))
        .with_llm(ScriptedModel::new(vec![LlmResponse::text("noted")]))
        .with_history_store(Arc::new(FileHistoryStore::new(&history_path)))
        .build()
        .await
        .unwrap();
    runtime.run_turn("target is 10.0.0.5", &CancellationToken::new()).await.unwrap();
    assert!(history_path.exists());

    runtime.clear_history().await.unwrap();
    assert!(runtime.agent().history().is_empty());
    assert!(!history_path.exists());
}

#[tokio::test]
async fn plugin_overrides_builtin_until_reload() {
    let tmp = tempfile::tempdir().unwrap();
    let plugins_dir = tmp.path().join("plugins");
    write_bundle(&plugins_dir, "safe-read", "read_file");

    let mut runtime = AgentBuilder::new(config_with_plugins(&plugins_dir))
        .with_llm(ScriptedModel::new(vec![]))
        .build()
        .await
        .unwrap();

    let source = runtime.registry().read().await.handler("read_file").unwrap().source().to_string();
    assert_eq!(source, "safe-read");
    let stats = runtime.registry_stats().await;
    assert_eq!(stats.tool_names.iter().filter(|n| *n == "read_file").count(), 1);

    std::fs::remove_dir_all(plugins_dir.join("safe-read")).unwrap();
    assert_eq!(runtime.reload_plugins().await, 0);

    let source = runtime.registry().read().await.handler("read_file").unwrap().source().to_string();
    assert_eq!(source, BUILTIN_SOURCE);
    assert_eq!(runtime.plugin_stats().total_plugins, 0);
}

#[tokio::test]
async fn shutdown_runs_plugin_hooks_and_saves_history() {
    let tmp = tempfile::tempdir().unwrap();
    let plugins_dir = tmp.path().join("plugins");
    write_bundle(&plugins_dir, "recon", "port_scan");
    let history_path = tmp.path().join("history.json");

    let runtime = AgentBuilder::new(config_with_plugins(&plugins_dir))
        .with_llm(ScriptedModel::new(vec![]))
        .with_history_store(Arc::new(FileHistoryStore::new(&history_path)))
        .build()
        .await
        .unwrap();
    assert_eq!(runtime.plugin_stats().total_tools, 1);

    runtime.shutdown().await.unwrap();
    assert!(plugins_dir.join("recon").join("shutdown.marker").exists());
    assert!(history_path.exists());
}
