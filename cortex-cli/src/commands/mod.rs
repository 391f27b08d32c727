pub mod chat;
pub mod config;
pub mod plugins;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cortex", version, about = "Cortex: tool-calling security assistant")]
pub struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra plugin directory to scan (repeatable)
    #[arg(long = "plugin-dir", global = true)]
    pub plugin_dir: Vec<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive REPL chat mode (default)
    Chat,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Load plugin bundles and list the tools they register
    Plugins,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the resolved configuration (secrets redacted)
    Show,
    /// Generate a sample config file
    Init,
    /// Print the config file location
    Path,
}
