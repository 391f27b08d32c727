//! Configuration
//!
//! TOML-based configuration: provider selection and credentials, agent loop
//! limits, plugin directories, project context. Missing credentials fall
//! back to the `AZURE_*` / `OPENAI_API_KEY` environment variables. Includes
//! startup validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent_loop::{AgentLoopConfig, DEFAULT_MAX_ITERATIONS};
use crate::context::ProjectInfo;
use crate::provider::CompletionOptions;
use crate::retry::RetryPolicy;

/// Azure API version used when none is configured.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

// ---------------------------------------------------------------------------
// Configuration structures
// ---------------------------------------------------------------------------

/// Top-level configuration (maps to TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    /// Active provider: "azure" or "openai".
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Active engagement, injected into the system prompt.
    #[serde(default)]
    pub project: Option<ProjectInfo>,

    #[serde(default)]
    pub system_prompt: SystemPromptConfig,

    /// Conversation history file. Defaults to the local data directory.
    #[serde(default)]
    pub history_file: Option<PathBuf>,

    /// Write logs here instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_provider() -> String {
    "azure".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub azure: Option<AzureConfig>,
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,
}

/// Azure OpenAI deployment. Every field falls back to its `AZURE_*` env var.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub api_key: Option<String>,
    /// Model name reported in logs; the deployment decides the real model.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Custom base URL for OpenAI-compatible endpoints.
    pub base_url: Option<String>,
}

/// Agent loop and tool execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum model rounds per user turn (default 10).
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-call timeout for tools without their own (default 60).
    pub tool_timeout_secs: u64,
    /// Timeout for `execute_command` (default 300).
    pub command_timeout_secs: u64,
    /// Timeout for `http_request` (default 30).
    pub http_timeout_secs: u64,
    /// Truncate serialized tool results beyond this many characters.
    pub max_tool_result_chars: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        let options = CompletionOptions::default();
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tool_timeout_secs: 60,
            command_timeout_secs: 300,
            http_timeout_secs: 30,
            max_tool_result_chars: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl AgentSettings {
    pub fn loop_config(&self) -> AgentLoopConfig {
        AgentLoopConfig {
            max_iterations: self.max_iterations,
            options: CompletionOptions {
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            },
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directories scanned for plugin bundles, in order.
    #[serde(default = "default_plugin_dirs")]
    pub dirs: Vec<PathBuf>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dirs: default_plugin_dirs(),
        }
    }
}

fn default_plugin_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(config) = dirs::config_dir() {
        dirs.push(config.join("cortex").join("plugins"));
    }
    dirs.push(PathBuf::from("plugins"));
    dirs
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemPromptConfig {
    /// Replaces the built-in prompt template.
    pub default: Option<String>,
}

/// Credentials and endpoint for the active provider, after env fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
        api_key: String,
        model: Option<String>,
    },
    OpenAi {
        api_key: String,
        model: String,
        base_url: String,
    },
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl CortexConfig {
    /// Load config from the default location, or defaults if there is none.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            info!("no config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        info!(path = %path.display(), provider = %config.provider, "loaded config");
        Ok(config)
    }

    /// `~/.config/cortex/config.toml` (platform config dir).
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        Ok(dir.join("cortex").join("config.toml"))
    }

    /// Where conversation history is kept.
    pub fn history_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.history_file {
            return Ok(path.clone());
        }
        let base = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine local data directory"))?;
        Ok(base.join("cortex").join("history.json"))
    }

    /// Prompt template, custom or built-in.
    pub fn system_prompt_template(&self) -> &str {
        self.system_prompt
            .default
            .as_deref()
            .unwrap_or(crate::system_prompt::DEFAULT_SYSTEM_PROMPT)
    }

    /// Resolve the active provider from config and process environment.
    pub fn resolve_provider(&self) -> Result<ProviderSettings> {
        self.resolve_provider_with(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Resolve the active provider with an explicit env lookup.
    pub fn resolve_provider_with<F>(&self, env: F) -> Result<ProviderSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self.provider.as_str() {
            "azure" => {
                let cfg = self.providers.azure.clone().unwrap_or_default();
                let pick = |value: Option<String>, var: &str| value.filter(|v| !v.is_empty()).or_else(|| env(var));

                let Some(endpoint) = pick(cfg.endpoint, "AZURE_ENDPOINT") else {
                    bail!("No Azure endpoint. Set AZURE_ENDPOINT or add endpoint under [providers.azure]");
                };
                let Some(api_key) = pick(cfg.api_key, "AZURE_API_KEY") else {
                    bail!("No API key for provider 'azure'. Set AZURE_API_KEY or add api_key under [providers.azure]");
                };
                let Some(deployment) = pick(cfg.deployment, "AZURE_DEPLOYMENT") else {
                    bail!("No Azure deployment. Set AZURE_DEPLOYMENT or add deployment under [providers.azure]");
                };
                let api_version = pick(cfg.api_version, "AZURE_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
                let model = pick(cfg.model, "AZURE_MODEL_NAME");

                Ok(ProviderSettings::Azure {
                    endpoint,
                    deployment,
                    api_version,
                    api_key,
                    model,
                })
            }
            "openai" => {
                let cfg = self.providers.openai.clone().unwrap_or_default();
                let Some(api_key) = cfg.api_key.filter(|k| !k.is_empty()).or_else(|| env("OPENAI_API_KEY")) else {
                    bail!("No API key for provider 'openai'. Set OPENAI_API_KEY or add api_key under [providers.openai]");
                };
                Ok(ProviderSettings::OpenAi {
                    api_key,
                    model: cfg.model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                    base_url: cfg.base_url.unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                })
            }
            other => bail!("unknown provider: '{}'. Expected: azure or openai", other),
        }
    }

    /// Validate the config on startup. Fatal problems are errors; anything
    /// else is returned as a warning.
    pub fn validate(&self) -> Result<Vec<String>> {
        self.validate_with(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn validate_with<F>(&self, env: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        self.resolve_provider_with(env)?;

        if self.agent.max_iterations == 0 {
            bail!("agent.max_iterations must be at least 1");
        }
        if self.agent.tool_timeout_secs == 0 || self.agent.command_timeout_secs == 0 {
            bail!("agent timeouts must be at least 1 second");
        }
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            warnings.push(format!(
                "agent.temperature {} is outside the usual 0.0-2.0 range",
                self.agent.temperature
            ));
        }
        if let Some(ref project) = self.project {
            if project.name.trim().is_empty() {
                warnings.push("[project] has an empty name".to_string());
            }
        }
        for dir in &self.plugins.dirs {
            if !dir.is_dir() {
                warnings.push(format!("plugin directory '{}' does not exist", dir.display()));
            }
        }

        Ok(warnings)
    }
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            providers: ProvidersConfig::default(),
            agent: AgentSettings::default(),
            plugins: PluginsConfig::default(),
            project: None,
            system_prompt: SystemPromptConfig::default(),
            history_file: None,
            log_file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config generation (for `config init`)
// ---------------------------------------------------------------------------

/// Generate a sample config TOML string.
pub fn sample_config() -> String {
    r#"# Cortex Configuration

# Active model provider: "azure" or "openai"
provider = "azure"

[providers.azure]
# endpoint = "https://my-resource.openai.azure.com"  # Or set AZURE_ENDPOINT
# deployment = "gpt-4o"                               # Or set AZURE_DEPLOYMENT
# api_key = "..."                                     # Or set AZURE_API_KEY
api_version = "2024-10-21"

[providers.openai]
# api_key = "sk-..."  # Or set OPENAI_API_KEY env var
model = "gpt-4o"
# base_url = "https://api.openai.com"  # For compatible endpoints

[agent]
max_iterations = 10
max_tokens = 16384
temperature = 0.7
tool_timeout_secs = 60
command_timeout_secs = 300
http_timeout_secs = 30
# max_tool_result_chars = 20000

[agent.retry]
max_retries = 3
base_delay_ms = 1000
max_delay_ms = 30000
backoff_multiplier = 2.0

[plugins]
dirs = ["plugins"]

# [project]
# name = "acme-webapp"
# target = "https://staging.acme.test"
# scope = ["*.acme.test", "10.20.0.0/16"]

# [system_prompt]
# default = "You are a security assistant. Project: {{project}}. Tools: {{tools}}"

# history_file = "/var/lib/cortex/history.json"
# log_file = "/var/log/cortex.log"
"#
    .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_minimal_config() {
        let config: CortexConfig = toml::from_str("provider = \"openai\"").unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.max_tokens, 16384);
        assert!(config.agent.max_tool_result_chars.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            provider = "azure"
            history_file = "/tmp/h.json"

            [providers.azure]
            endpoint = "https://res.openai.azure.com"
            deployment = "gpt4o-prod"
            api_key = "k"

            [agent]
            max_iterations = 4
            max_tool_result_chars = 5000

            [agent.retry]
            max_retries = 5

            [plugins]
            dirs = ["/opt/cortex/plugins"]

            [project]
            name = "acme"
            target = "10.0.0.0/24"
        "#;
        let config: CortexConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.retry.max_retries, 5);
        assert_eq!(config.agent.retry.base_delay_ms, 1000);
        assert_eq!(config.agent.max_tool_result_chars, Some(5000));
        assert_eq!(config.plugins.dirs, vec![PathBuf::from("/opt/cortex/plugins")]);
        assert_eq!(config.project.unwrap().target.as_deref(), Some("10.0.0.0/24"));
        assert_eq!(config.history_file, Some(PathBuf::from("/tmp/h.json")));
    }

    #[test]
    fn azure_falls_back_to_env() {
        let config = CortexConfig::default();
        let settings = config
            .resolve_provider_with(env_from(&[
                ("AZURE_ENDPOINT", "https://env.openai.azure.com"),
                ("AZURE_API_KEY", "env-key"),
                ("AZURE_DEPLOYMENT", "env-deploy"),
                ("AZURE_MODEL_NAME", "gpt-4o"),
            ]))
            .unwrap();
        assert_eq!(
            settings,
            ProviderSettings::Azure {
                endpoint: "https://env.openai.azure.com".into(),
                deployment: "env-deploy".into(),
                api_version: DEFAULT_AZURE_API_VERSION.into(),
                api_key: "env-key".into(),
                model: Some("gpt-4o".into()),
            }
        );
    }

    #[test]
    fn config_values_win_over_env() {
        let mut config = CortexConfig::default();
        config.providers.azure = Some(AzureConfig {
            endpoint: Some("https://cfg".into()),
            deployment: Some("cfg-deploy".into()),
            api_key: Some("cfg-key".into()),
            ..Default::default()
        });
        let settings = config
            .resolve_provider_with(env_from(&[("AZURE_API_KEY", "env-key")]))
            .unwrap();
        match settings {
            ProviderSettings::Azure { api_key, endpoint, .. } => {
                assert_eq!(api_key, "cfg-key");
                assert_eq!(endpoint, "https://cfg");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_key_is_fatal() {
        let config = CortexConfig::default();
        let err = config
            .validate_with(env_from(&[("AZURE_ENDPOINT", "https://x")]))
            .unwrap_err();
        assert!(err.to_string().contains("AZURE_API_KEY"));

        let config: CortexConfig = toml::from_str("provider = \"gemini\"").unwrap();
        assert!(config.validate_with(env_from(&[])).is_err());
    }

    #[test]
    fn openai_defaults() {
        let config: CortexConfig = toml::from_str("provider = \"openai\"").unwrap();
        let settings = config
            .resolve_provider_with(env_from(&[("OPENAI_API_KEY", "sk-test")]))
            .unwrap();
        assert_eq!(
            settings,
            ProviderSettings::OpenAi {
                api_key: "sk-test".into(),
                model: DEFAULT_OPENAI_MODEL.into(),
                base_url: DEFAULT_OPENAI_BASE_URL.into(),
            }
        );
    }

    #[test]
    fn validate_warns_on_missing_plugin_dir() {
        let mut config: CortexConfig = toml::from_str("provider = \"openai\"").unwrap();
        config.plugins.dirs = vec![PathBuf::from("/nonexistent/cortex-plugins")];
        let warnings = config
            .validate_with(env_from(&[("OPENAI_API_KEY", "sk")]))
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("/nonexistent/cortex-plugins"));
    }

    #[test]
    fn loop_config_from_settings() {
        let settings = AgentSettings {
            max_iterations: 3,
            temperature: 0.2,
            ..Default::default()
        };
        let cfg = settings.loop_config();
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.options.temperature, 0.2);
        assert_eq!(cfg.options.max_tokens, 16384);
    }

    #[test]
    fn sample_config_parses() {
        let config: CortexConfig = toml::from_str(&sample_config()).unwrap();
        assert_eq!(config.provider, "azure");
        assert_eq!(config.agent.max_iterations, 10);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, sample_config()).unwrap();
        let config = CortexConfig::load_from(&path).unwrap();
        assert_eq!(config.plugins.dirs, vec![PathBuf::from("plugins")]);
    }
}
