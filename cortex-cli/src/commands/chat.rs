use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use cortex_core::config::CortexConfig;
use cortex_core::{AgentLoopResult, EventCallback, LoopEvent, TurnOutcome};

use crate::runtime::build_runtime;

/// Drops the conversation history, in memory and on disk.
const CLEAR_COMMAND: &str = "/clear";

/// Longest argument preview shown on a tool status line.
const ARG_PREVIEW_CHARS: usize = 120;

pub async fn run_chat_mode(config: CortexConfig, plugin_dirs: Vec<PathBuf>) -> Result<()> {
    info!(provider = %config.provider, "starting Cortex in chat mode");

    match config.validate() {
        Ok(warnings) => {
            for w in warnings {
                eprintln!("⚠ {}", w);
            }
        }
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            eprintln!("   Run `cortex config init` to set up your configuration.");
            std::process::exit(1);
        }
    }

    let max_iterations = config.agent.max_iterations;
    let on_event: EventCallback = Arc::new(print_event);
    let mut runtime = build_runtime(config, plugin_dirs, Some(on_event)).await?;

    let session = Uuid::new_v4();
    let tools = runtime.registry_stats().await;
    let plugins = runtime.plugin_stats();
    let restored = runtime.agent().history().len();

    eprintln!("🛡  Cortex v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {}", runtime.agent().provider().name());
    if let Some(ref project) = runtime.config().project {
        eprintln!("   Project: {}", project.summary());
    }
    eprintln!(
        "   Tools: {} available ({} from {} plugins)",
        tools.total_tools, plugins.total_tools, plugins.total_plugins
    );
    if restored > 0 {
        eprintln!("   History: {} messages restored", restored);
    }
    eprintln!("   Type '{}' to forget the conversation, 'exit' or 'quit' to leave\n", CLEAR_COMMAND);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        eprint!("cortex> ");
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(l) => l.trim().to_string(),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        };

        if line.is_empty() {
            continue;
        }
        if is_exit_command(&line) {
            break;
        }
        if line == CLEAR_COMMAND {
            match runtime.clear_history().await {
                Ok(()) => eprintln!("🧹 History cleared."),
                Err(e) => eprintln!("❌ Failed to clear history: {}", e),
            }
            continue;
        }

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let span = info_span!("turn", %session);
        let result = runtime.run_turn(&line, &cancel).instrument(span).await;
        watcher.abort();

        match result {
            Ok(result) => print_result(&result, max_iterations),
            Err(e) => {
                eprintln!("❌ Error: {}", e);
                for cause in e.chain().skip(1) {
                    eprintln!("   caused by: {}", cause);
                }
            }
        }
    }

    eprintln!("Shutting down...");
    runtime.shutdown().await?;
    eprintln!("Goodbye!");
    Ok(())
}

fn is_exit_command(line: &str) -> bool {
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

fn print_event(event: &LoopEvent) {
    match event {
        LoopEvent::RoundStarted { .. } => {}
        LoopEvent::AssistantText(text) => eprintln!("💭 {}", text),
        LoopEvent::ToolStarted { name, arguments, .. } => {
            eprintln!("🔧 {} {}", name, preview(&arguments.to_string(), ARG_PREVIEW_CHARS));
        }
        LoopEvent::ToolFinished { name, is_error, .. } => {
            if *is_error {
                eprintln!("   ✗ {} failed", name);
            } else {
                eprintln!("   ✓ {} done", name);
            }
        }
    }
}

fn print_result(result: &AgentLoopResult, max_iterations: usize) {
    match result.outcome {
        TurnOutcome::Completed => {
            println!("\n{}\n", result.text.as_deref().unwrap_or_default());
        }
        TurnOutcome::MaxIterations => {
            eprintln!(
                "⚠ Stopped after {} tool rounds without a final answer. Ask me to continue if needed.",
                max_iterations
            );
        }
        TurnOutcome::Cancelled => eprintln!("⏹ Cancelled."),
    }
    info!(
        rounds = result.rounds,
        input_tokens = result.usage.input_tokens,
        output_tokens = result.usage.output_tokens,
        "turn finished"
    );
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_commands_are_case_insensitive() {
        for cmd in ["exit", "quit", "EXIT", "Quit"] {
            assert!(is_exit_command(cmd), "{cmd}");
        }
        assert!(!is_exit_command("exit now"));
        assert!(!is_exit_command("scan 10.0.0.5"));
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 2), "éé…");
    }
}
