use std::path::PathBuf;

use anyhow::{Context, Result};

use cortex_core::builtin::register_builtins;
use cortex_core::config::CortexConfig;
use cortex_core::registry::BUILTIN_SOURCE;
use cortex_core::{PluginLoader, ToolRegistry};

/// Load every plugin bundle the way `chat` would and print what registered.
pub async fn run_plugins_command(config: CortexConfig, extra_dirs: Vec<PathBuf>) -> Result<()> {
    let registry = {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry).context("failed to register built-in tools")?;
        registry.into_shared()
    };

    let mut dirs = config.plugins.dirs.clone();
    dirs.extend(extra_dirs);
    if dirs.is_empty() {
        eprintln!("No plugin directories configured. Add [plugins] dirs or pass --plugin-dir.");
    }

    let mut loader = PluginLoader::new(dirs, registry.clone());
    loader.load_all().await;

    let plugins = loader.stats();
    let tools = registry.read().await.stats();

    if plugins.plugins.is_empty() {
        println!("No plugins loaded.");
    } else {
        println!("{:<24} {:<10} {:<6} {}", "PLUGIN", "VERSION", "TOOLS", "PATH");
        println!("{}", "-".repeat(72));
        for p in &plugins.plugins {
            println!(
                "{:<24} {:<10} {:<6} {}",
                p.name,
                p.version,
                p.tools.len(),
                p.path.display()
            );
            for tool in &p.tools {
                println!("    - {}", tool);
            }
        }
    }

    println!();
    println!(
        "{} plugins, {} plugin tools, {} tools total ({} built-in)",
        plugins.total_plugins,
        plugins.total_tools,
        tools.total_tools,
        tools.by_source.get(BUILTIN_SOURCE).copied().unwrap_or(0)
    );

    loader.shutdown().await;
    Ok(())
}
