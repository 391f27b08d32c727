//! `execute_command`: run a shell command with a hard timeout.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use crate::context::AgentContext;
use crate::types::ToolResult;

#[derive(Debug, Deserialize)]
pub(super) struct ExecuteCommandArgs {
    command: String,
    #[serde(default)]
    working_directory: Option<String>,
}

pub(super) async fn execute_command(
    args: ExecuteCommandArgs,
    ctx: &AgentContext,
    timeout: Duration,
) -> ToolResult {
    let cwd = match args.working_directory.as_deref() {
        Some(dir) if !dir.is_empty() => ctx.resolve_path(dir),
        _ => ctx.working_dir.clone(),
    };

    debug!(command = %args.command, cwd = %cwd.display(), "spawning shell command");

    let child = Command::new("sh")
        .arg("-c")
        .arg(&args.command)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(c) => c,
        Err(e) => {
            return ToolResult::failure(format!(
                "failed to spawn command in {}: {}",
                cwd.display(),
                e
            ))
        }
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return ToolResult::failure(format!("failed to wait for command: {}", e)),
        Err(_) => {
            return ToolResult::failure(format!(
                "command timed out after {}s",
                timeout.as_secs()
            ))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let exit_code = output.status.code();

    if output.status.success() {
        ToolResult::ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
            "working_directory": cwd,
        }))
    } else {
        let reason = match exit_code {
            Some(code) => format!("command exited with status {}", code),
            None => "command terminated by signal".to_string(),
        };
        ToolResult::failure_with(
            reason,
            json!({
                "stdout": stdout,
                "stderr": stderr,
                "exit_code": exit_code,
            }),
        )
    }
}
