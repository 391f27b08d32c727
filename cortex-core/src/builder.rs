//! Agent Builder and Runtime
//!
//! `AgentBuilder` wires the pieces together in startup order: built-in
//! tools first, then plugin tools (which win on name collisions), then the
//! dispatcher and the agent seeded with persisted history. `AgentRuntime`
//! holds the result and is what a front end drives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent_loop::{Agent, AgentLoopResult, EventCallback};
use crate::builtin::{register_builtins, BuiltinRuntime};
use crate::config::CortexConfig;
use crate::context::AgentContext;
use crate::dispatcher::ToolDispatcher;
use crate::history::{HistoryStore, MemoryHistoryStore};
use crate::plugin::{PluginLoader, PluginStats};
use crate::provider::LlmProvider;
use crate::registry::{RegistryStats, SharedRegistry, ToolRegistry};

// ---------------------------------------------------------------------------
// AgentBuilder
// ---------------------------------------------------------------------------

pub struct AgentBuilder {
    config: CortexConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    history_store: Option<Arc<dyn HistoryStore>>,
    extra_plugin_dirs: Vec<PathBuf>,
    on_event: Option<EventCallback>,
}

impl AgentBuilder {
    pub fn new(config: CortexConfig) -> Self {
        Self {
            config,
            provider: None,
            history_store: None,
            extra_plugin_dirs: Vec::new(),
            on_event: None,
        }
    }

    pub fn with_llm(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Defaults to an in-memory store.
    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    /// Scanned after the configured plugin directories.
    pub fn with_plugin_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.extra_plugin_dirs.extend(dirs);
        self
    }

    pub fn on_event(mut self, cb: EventCallback) -> Self {
        self.on_event = Some(cb);
        self
    }

    pub async fn build(self) -> Result<AgentRuntime> {
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("an LLM provider is required"))?;
        let history_store = self
            .history_store
            .unwrap_or_else(|| Arc::new(MemoryHistoryStore::new()));
        let settings = &self.config.agent;

        let registry = {
            let mut registry = ToolRegistry::new();
            register_builtins(&mut registry).context("failed to register built-in tools")?;
            registry.into_shared()
        };

        let mut plugin_dirs = self.config.plugins.dirs.clone();
        plugin_dirs.extend(self.extra_plugin_dirs);
        let mut plugins = PluginLoader::new(plugin_dirs, registry.clone());
        plugins.load_all().await;

        let builtins = BuiltinRuntime::new(settings.command_timeout(), settings.http_timeout())
            .context("failed to build HTTP client for built-in tools")?;
        let dispatcher = Arc::new(
            ToolDispatcher::new(registry.clone(), builtins)
                .with_timeout(settings.tool_timeout())
                .with_max_result_chars(settings.max_tool_result_chars),
        );

        let history = history_store.load().await.context("failed to load history")?;
        let mut agent = Agent::new(provider, dispatcher, settings.loop_config())
            .with_system_prompt(self.config.system_prompt_template())
            .with_history(history);
        if let Some(cb) = self.on_event {
            agent = agent.on_event(cb);
        }

        let stats = registry.read().await.stats();
        info!(
            tools = stats.total_tools,
            plugins = plugins.plugins().len(),
            history = agent.history().len(),
            "agent runtime ready"
        );

        Ok(AgentRuntime {
            agent,
            registry,
            plugins,
            history_store,
            config: self.config,
        })
    }
}

// ---------------------------------------------------------------------------
// AgentRuntime
// ---------------------------------------------------------------------------

pub struct AgentRuntime {
    agent: Agent,
    registry: SharedRegistry,
    plugins: PluginLoader,
    history_store: Arc<dyn HistoryStore>,
    config: CortexConfig,
}

impl AgentRuntime {
    pub fn config(&self) -> &CortexConfig {
        &self.config
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Context snapshot for the next turn.
    pub fn context(&self) -> AgentContext {
        AgentContext::detect().with_project(self.config.project.clone())
    }

    /// Run one user turn and persist the updated history.
    ///
    /// A failed save is logged, not returned: the turn itself succeeded.
    pub async fn run_turn(&mut self, input: &str, cancel: &CancellationToken) -> Result<AgentLoopResult> {
        let ctx = self.context();
        let result = self.agent.run_turn(input, &ctx, cancel).await?;
        if let Err(e) = self.history_store.save(self.agent.history()).await {
            warn!(err = %e, "failed to save history");
        }
        Ok(result)
    }

    pub async fn clear_history(&mut self) -> Result<()> {
        self.agent.clear_history();
        self.history_store.clear().await
    }

    pub async fn registry_stats(&self) -> RegistryStats {
        self.registry.read().await.stats()
    }

    pub fn plugin_stats(&self) -> PluginStats {
        self.plugins.stats()
    }

    pub async fn reload_plugins(&mut self) -> usize {
        self.plugins.reload().await
    }

    /// Run plugin shutdown hooks and flush history.
    pub async fn shutdown(&self) -> Result<()> {
        self.plugins.shutdown().await;
        self.history_store
            .save(self.agent.history())
            .await
            .context("failed to save history on shutdown")?;
        info!("agent runtime shut down");
        Ok(())
    }
}
