use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use cortex_core::config::{CortexConfig, ProviderSettings};
use cortex_core::{AgentBuilder, AgentRuntime, EventCallback, FileHistoryStore};
use cortex_provider_openai::OpenAiProvider;

/// Build the runtime for the configured provider with on-disk history.
pub async fn build_runtime(
    config: CortexConfig,
    plugin_dirs: Vec<PathBuf>,
    on_event: Option<EventCallback>,
) -> Result<AgentRuntime> {
    let settings = config.resolve_provider().with_context(|| {
        format!(
            "no usable '{}' provider.\nConfig location: {}",
            config.provider,
            CortexConfig::default_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "unknown".into())
        )
    })?;
    match &settings {
        ProviderSettings::Azure { endpoint, deployment, api_version, .. } => {
            info!(%endpoint, %deployment, %api_version, "using Azure OpenAI provider");
        }
        ProviderSettings::OpenAi { model, base_url, .. } => {
            info!(%model, %base_url, "using OpenAI provider");
        }
    }
    let provider = OpenAiProvider::from_settings(&settings).with_retry(config.agent.retry.clone());

    let history_path = config.history_path()?;
    info!(path = %history_path.display(), "using history file");

    let mut builder = AgentBuilder::new(config)
        .with_llm(Arc::new(provider))
        .with_history_store(Arc::new(FileHistoryStore::new(history_path)))
        .with_plugin_dirs(plugin_dirs);
    if let Some(cb) = on_event {
        builder = builder.on_event(cb);
    }

    builder.build().await.context("failed to initialize agent runtime")
}
