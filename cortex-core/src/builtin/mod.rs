//! Built-in Tools
//!
//! The core tool set every session starts with: shell execution, file I/O,
//! directory listing and raw HTTP requests. Each tool is a variant of
//! [`BuiltinTool`]; [`register_builtins`] puts them all in the registry.

mod fs;
mod http;
mod shell;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::json;

use crate::context::AgentContext;
use crate::error::RegistryError;
use crate::registry::{ToolHandler, ToolRegistry};
use crate::types::{ToolDefinition, ToolResult};

/// A tool implemented inside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    ExecuteCommand,
    ReadFile,
    WriteFile,
    ListDirectory,
    GetCwd,
    HttpRequest,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 6] = [
        BuiltinTool::ExecuteCommand,
        BuiltinTool::ReadFile,
        BuiltinTool::WriteFile,
        BuiltinTool::ListDirectory,
        BuiltinTool::GetCwd,
        BuiltinTool::HttpRequest,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTool::ExecuteCommand => "execute_command",
            BuiltinTool::ReadFile => "read_file",
            BuiltinTool::WriteFile => "write_file",
            BuiltinTool::ListDirectory => "list_directory",
            BuiltinTool::GetCwd => "get_cwd",
            BuiltinTool::HttpRequest => "http_request",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Descriptor advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        let (description, parameters) = match self {
            BuiltinTool::ExecuteCommand => (
                "Execute a bash command on the host. Returns stdout, stderr and exit code. \
                 Use this for running shell commands, security tooling, checking system info, etc.",
                json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "The bash command to execute (e.g. 'ls -la', 'nmap -F 10.0.0.1')"
                        },
                        "working_directory": {
                            "type": "string",
                            "description": "Optional directory to run the command in. Defaults to the current working directory."
                        }
                    },
                    "required": ["command"]
                }),
            ),
            BuiltinTool::ReadFile => (
                "Read the contents of a file from the filesystem",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "The absolute or relative path to the file to read"
                        }
                    },
                    "required": ["file_path"]
                }),
            ),
            BuiltinTool::WriteFile => (
                "Write content to a file. Creates the file (and parent directories) if missing, overwrites if it exists.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "The absolute or relative path to the file to write"
                        },
                        "content": {
                            "type": "string",
                            "description": "The content to write to the file"
                        }
                    },
                    "required": ["file_path", "content"]
                }),
            ),
            BuiltinTool::ListDirectory => (
                "List contents of a directory with type, size and modification time",
                json!({
                    "type": "object",
                    "properties": {
                        "directory_path": {
                            "type": "string",
                            "description": "The directory to list. Defaults to the current directory."
                        }
                    },
                    "required": []
                }),
            ),
            BuiltinTool::GetCwd => (
                "Get the current working directory",
                json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            ),
            BuiltinTool::HttpRequest => (
                "Send an HTTP request and return status, response headers and body",
                json!({
                    "type": "object",
                    "properties": {
                        "url": {
                            "type": "string",
                            "description": "Absolute URL to request"
                        },
                        "method": {
                            "type": "string",
                            "enum": ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"],
                            "description": "HTTP method (default GET)"
                        },
                        "headers": {
                            "type": "object",
                            "additionalProperties": { "type": "string" },
                            "description": "Request headers"
                        },
                        "body": {
                            "type": "string",
                            "description": "Raw request body"
                        }
                    },
                    "required": ["url"]
                }),
            ),
        };
        ToolDefinition::new(self.name(), description, parameters)
    }
}

/// Register every built-in tool.
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    for tool in BuiltinTool::ALL {
        registry.register(tool.definition(), ToolHandler::Builtin(tool))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Shared resources the built-in tools run with.
#[derive(Debug, Clone)]
pub struct BuiltinRuntime {
    /// Upper bound for one `execute_command` invocation.
    pub command_timeout: Duration,
    pub http: reqwest::Client,
}

impl BuiltinRuntime {
    pub fn new(command_timeout: Duration, http_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            command_timeout,
            http,
        })
    }

    /// Run a built-in tool. Expected failures come back as failed results.
    pub async fn execute(
        &self,
        tool: BuiltinTool,
        arguments: serde_json::Value,
        ctx: &AgentContext,
    ) -> ToolResult {
        match tool {
            BuiltinTool::ExecuteCommand => match parse_args(tool, arguments) {
                Ok(args) => shell::execute_command(args, ctx, self.command_timeout).await,
                Err(r) => r,
            },
            BuiltinTool::ReadFile => match parse_args(tool, arguments) {
                Ok(args) => fs::read_file(args, ctx).await,
                Err(r) => r,
            },
            BuiltinTool::WriteFile => match parse_args(tool, arguments) {
                Ok(args) => fs::write_file(args, ctx).await,
                Err(r) => r,
            },
            BuiltinTool::ListDirectory => match parse_args(tool, arguments) {
                Ok(args) => fs::list_directory(args, ctx).await,
                Err(r) => r,
            },
            BuiltinTool::GetCwd => ToolResult::ok(json!({ "cwd": ctx.working_dir })),
            BuiltinTool::HttpRequest => match parse_args(tool, arguments) {
                Ok(args) => http::http_request(&self.http, args).await,
                Err(r) => r,
            },
        }
    }
}

fn parse_args<T: DeserializeOwned>(
    tool: BuiltinTool,
    arguments: serde_json::Value,
) -> Result<T, ToolResult> {
    serde_json::from_value(arguments).map_err(|e| {
        ToolResult::failure(format!("invalid arguments for {}: {}", tool.name(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for tool in BuiltinTool::ALL {
            assert_eq!(BuiltinTool::from_name(tool.name()), Some(tool));
            assert!(tool.definition().parameters.is_object());
        }
        assert_eq!(BuiltinTool::from_name("web_search"), None);
    }

    #[test]
    fn register_builtins_fills_registry() {
        let mut reg = ToolRegistry::new();
        register_builtins(&mut reg).unwrap();
        assert_eq!(reg.len(), BuiltinTool::ALL.len());
        assert!(reg.has_handler("execute_command"));
    }

    #[tokio::test]
    async fn get_cwd_reports_context_dir() {
        let rt = BuiltinRuntime::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        let ctx = AgentContext::detect().with_working_dir("/opt/work");
        let r = rt.execute(BuiltinTool::GetCwd, json!({}), &ctx).await;
        assert!(r.success);
        assert_eq!(r.data, Some(json!({"cwd": "/opt/work"})));
    }

    #[tokio::test]
    async fn bad_arguments_are_a_failed_result() {
        let rt = BuiltinRuntime::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        let ctx = AgentContext::detect();
        let r = rt.execute(BuiltinTool::ReadFile, json!({"path": "x"}), &ctx).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("file_path"));
    }
}
