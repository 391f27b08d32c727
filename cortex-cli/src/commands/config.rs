use std::path::{Path, PathBuf};

use anyhow::Result;
use cortex_core::config::{self, CortexConfig};

use crate::commands::ConfigAction;

const REDACTED: &str = "********";

pub fn run_config_command(action: ConfigAction, config: CortexConfig, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&redacted(config))?;
            println!("{}", toml_str);
        }
        ConfigAction::Init => {
            let path = config_path(explicit)?;
            if path.exists() {
                eprintln!("Config already exists at: {}", path.display());
                eprintln!("Edit it directly or delete it first.");
            } else {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, config::sample_config())?;
                eprintln!("✅ Config written to: {}", path.display());
                eprintln!("   Edit it to add your Azure deployment or OpenAI key.");
            }
        }
        ConfigAction::Path => {
            println!("{}", config_path(explicit)?.display());
        }
    }
    Ok(())
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => CortexConfig::default_path(),
    }
}

/// Blank out API keys before printing.
fn redacted(mut config: CortexConfig) -> CortexConfig {
    if let Some(ref mut azure) = config.providers.azure {
        if azure.api_key.is_some() {
            azure.api_key = Some(REDACTED.to_string());
        }
    }
    if let Some(ref mut openai) = config.providers.openai {
        if openai.api_key.is_some() {
            openai.api_key = Some(REDACTED.to_string());
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::config::{AzureConfig, OpenAiConfig};

    #[test]
    fn show_redacts_api_keys() {
        let mut config = CortexConfig::default();
        config.providers.azure = Some(AzureConfig {
            api_key: Some("azure-secret".into()),
            ..Default::default()
        });
        config.providers.openai = Some(OpenAiConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        });

        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("azure-secret"));
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn init_writes_sample_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        run_config_command(ConfigAction::Init, CortexConfig::default(), Some(&path)).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, config::sample_config());

        std::fs::write(&path, "provider = \"openai\"\n").unwrap();
        run_config_command(ConfigAction::Init, CortexConfig::default(), Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "provider = \"openai\"\n");

        let loaded = CortexConfig::load_from(&path).unwrap();
        assert_eq!(loaded.provider, "openai");
    }
}
