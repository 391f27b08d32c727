//! Cortex CLI
//!
//! Binary entry point. Modes:
//! - `chat` (default): interactive REPL driving the tool-calling agent
//! - `config`: configuration management
//! - `plugins`: load plugin bundles and report what they register

mod commands;
mod runtime;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cortex_core::config::CortexConfig;

use crate::commands::chat::run_chat_mode;
use crate::commands::config::run_config_command;
use crate::commands::plugins::run_plugins_command;
use crate::commands::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("❌ Cortex fatal error: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("   caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        CortexConfig::load_from(path)
            .with_context(|| format!("failed to load config from '{}'", path.display()))?
    } else {
        CortexConfig::load_default()?
    };

    let log_file = cli.log_file.clone().or_else(|| config.log_file.clone());
    init_logging(log_file.as_deref())?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat_mode(config, cli.plugin_dir).await,
        Commands::Config { action } => run_config_command(action, config, cli.config.as_deref()),
        Commands::Plugins => run_plugins_command(config, cli.plugin_dir).await,
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logs go to stderr, or to `log_file` so they stay out of the REPL.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            // No ANSI escapes when stderr is captured.
            let is_tty = std::io::IsTerminal::is_terminal(&std::io::stderr());
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(is_tty)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
