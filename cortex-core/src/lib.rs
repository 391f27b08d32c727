//! # Cortex Core
//!
//! Core library for the Cortex security assistant: the tool registry and
//! dispatcher, built-in tools, the plugin loader, the model adapter trait,
//! and the agentic tool loop.

pub mod agent_loop;
pub mod builder;
pub mod builtin;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod plugin;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod system_prompt;
pub mod types;

// Re-export key types
pub use agent_loop::{Agent, AgentLoopConfig, AgentLoopResult, EventCallback, LoopEvent, TurnOutcome};
pub use builder::{AgentBuilder, AgentRuntime};
pub use builtin::{BuiltinRuntime, BuiltinTool};
pub use config::{CortexConfig, ProviderSettings};
pub use context::{AgentContext, ProjectInfo};
pub use dispatcher::ToolDispatcher;
pub use error::{PluginError, RegistryError};
pub use history::{FileHistoryStore, HistoryStore, MemoryHistoryStore};
pub use plugin::{PluginLoader, PluginManifest, PluginStats};
pub use provider::{CompletionOptions, LlmProvider, LlmResponse, ModelInfo, StopReason, TokenUsage};
pub use registry::{SharedRegistry, ToolFn, ToolHandler, ToolRegistry};
pub use types::{Message, MessageContent, Role, ToolCallRequest, ToolCallResult, ToolDefinition, ToolResult};
