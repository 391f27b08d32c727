//! Tool Registry
//!
//! Single dispatch table mapping tool name → (descriptor, handler). Built-in
//! tools and plugin tools live in the same table; the handler is a tagged
//! variant so the dispatcher resolves both through one lookup.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::builtin::BuiltinTool;
use crate::context::AgentContext;
use crate::error::RegistryError;
use crate::types::ToolDefinition;

/// Source label used for built-in tools in stats.
pub const BUILTIN_SOURCE: &str = "builtin";

/// Registry shared between the loop, the dispatcher and the plugin loader.
pub type SharedRegistry = Arc<RwLock<ToolRegistry>>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// An in-process or out-of-process tool implementation.
///
/// Returns the tool output as text, ideally a serialized `ToolResult`.
/// Expected failures should be reported as `{"success": false, ...}` text;
/// `Err` is tolerated and converted by the dispatcher.
#[async_trait]
pub trait ToolFn: Send + Sync {
    async fn call(
        &self,
        tool: &str,
        arguments: serde_json::Value,
        ctx: &AgentContext,
    ) -> Result<String>;

    /// Per-handler timeout override.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Adapter turning an async closure into a `ToolFn`.
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F, Fut> ToolFn for FnTool<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    async fn call(
        &self,
        _tool: &str,
        arguments: serde_json::Value,
        _ctx: &AgentContext,
    ) -> Result<String> {
        (self.0)(arguments).await
    }
}

/// How a registered tool is executed.
#[derive(Clone)]
pub enum ToolHandler {
    /// Implemented in this crate.
    Builtin(BuiltinTool),
    /// Supplied at runtime; `source` names the plugin (or embedder) that owns it.
    Dynamic {
        source: String,
        handler: Arc<dyn ToolFn>,
    },
}

impl ToolHandler {
    pub fn dynamic(source: impl Into<String>, handler: Arc<dyn ToolFn>) -> Self {
        ToolHandler::Dynamic {
            source: source.into(),
            handler,
        }
    }

    /// Wrap an async closure taking the tool arguments.
    pub fn from_fn<F, Fut>(source: impl Into<String>, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self::dynamic(source, Arc::new(FnTool(f)))
    }

    pub fn source(&self) -> &str {
        match self {
            ToolHandler::Builtin(_) => BUILTIN_SOURCE,
            ToolHandler::Dynamic { source, .. } => source,
        }
    }
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolHandler::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            ToolHandler::Dynamic { source, .. } => {
                f.debug_struct("Dynamic").field("source", source).finish_non_exhaustive()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A descriptor and the handler serving it.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

/// Counts reported at startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    pub tool_names: Vec<String>,
    /// Tool count per source (`builtin` or plugin name).
    pub by_source: BTreeMap<String, usize>,
}

/// Tool table in registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into the shared form used by the rest of the crate.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Register a tool. A name collision replaces the previous entry in place.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: ToolHandler,
    ) -> Result<(), RegistryError> {
        validate_definition(&definition)?;

        match &handler {
            ToolHandler::Builtin(b) if b.name() != definition.name => {
                return Err(RegistryError::InvalidHandler {
                    tool: definition.name.clone(),
                    reason: format!("built-in handler '{}' cannot serve this name", b.name()),
                });
            }
            ToolHandler::Dynamic { source, .. } if source.trim().is_empty() => {
                return Err(RegistryError::InvalidHandler {
                    tool: definition.name.clone(),
                    reason: "dynamic handler has no source".to_string(),
                });
            }
            _ => {}
        }

        let source = handler.source().to_string();
        let entry = RegisteredTool { definition, handler };

        if let Some(pos) = self.position(&entry.definition.name) {
            warn!(
                tool = %entry.definition.name,
                previous = %self.tools[pos].handler.source(),
                source = %source,
                "tool already registered, replacing"
            );
            self.tools[pos] = entry;
        } else {
            info!(tool = %entry.definition.name, source = %source, "registered tool");
            self.tools.push(entry);
        }
        Ok(())
    }

    /// All descriptors, in stable registration order.
    pub fn descriptors(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.definition.name == name)
    }

    pub fn handler(&self, name: &str) -> Option<ToolHandler> {
        self.get(name).map(|t| t.handler.clone())
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove one tool. Returns whether it existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(pos) => {
                self.tools.remove(pos);
                info!(tool = %name, "unregistered tool");
                true
            }
            None => false,
        }
    }

    /// Remove every tool owned by `source`. Returns how many were removed.
    pub fn unregister_source(&mut self, source: &str) -> usize {
        let before = self.tools.len();
        self.tools.retain(|t| t.handler.source() != source);
        before - self.tools.len()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
        info!("cleared all registered tools");
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_source = BTreeMap::new();
        for t in &self.tools {
            *by_source.entry(t.handler.source().to_string()).or_insert(0) += 1;
        }
        RegistryStats {
            total_tools: self.tools.len(),
            tool_names: self.tools.iter().map(|t| t.definition.name.clone()).collect(),
            by_source,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.tools.iter().position(|t| t.definition.name == name)
    }
}

/// Names must match what chat-completion APIs accept: `[A-Za-z0-9_-]{1,64}`.
pub(crate) fn validate_definition(def: &ToolDefinition) -> Result<(), RegistryError> {
    let name = def.name.as_str();
    if name.trim().is_empty() {
        return Err(RegistryError::InvalidDescriptor("tool name is empty".into()));
    }
    if name.len() > 64
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RegistryError::InvalidDescriptor(format!(
            "tool name '{}' must be 1-64 characters of [A-Za-z0-9_-]",
            name
        )));
    }
    if !def.parameters.is_object() {
        return Err(RegistryError::InvalidDescriptor(format!(
            "tool '{}' has no parameter schema object",
            name
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
