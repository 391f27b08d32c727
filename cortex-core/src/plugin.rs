//! Plugin Loader
//!
//! Discovers plugin bundles on disk and merges their tools into the shared
//! registry. A bundle is a JSON manifest (either `<dir>/<name>.json` or
//! `<dir>/<bundle>/plugin.json`) naming its tools and an external handler
//! command. The handler is spawned once per tool call: it receives
//! `{"tool", "arguments", "context"}` on stdin and prints its result on
//! stdout.
//!
//! A broken bundle never stops discovery: each unit is loaded
//! independently and failures are logged with their reason.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::context::AgentContext;
use crate::error::PluginError;
use crate::registry::{validate_definition, RegisteredTool, SharedRegistry, ToolFn, ToolHandler};
use crate::types::ToolDefinition;

/// File name of the manifest inside a bundle directory.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Upper bound for initialize/shutdown hooks.
const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// An external command, resolved relative to the bundle directory when it
/// contains a path separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    fn to_command(&self, dir: &Path) -> Command {
        let program = if self.command.contains('/') && !Path::new(&self.command).is_absolute() {
            dir.join(&self.command)
        } else {
            PathBuf::from(&self.command)
        };
        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .envs(&self.env)
            .current_dir(dir)
            .kill_on_drop(true);
        cmd
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    author: Option<String>,
    tools: Option<Vec<Value>>,
    handler: Option<CommandSpec>,
    initialize: Option<CommandSpec>,
    shutdown: Option<CommandSpec>,
    #[serde(default)]
    requires: Vec<String>,
    timeout_secs: Option<u64>,
}

/// A validated plugin manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub tools: Vec<ToolDefinition>,
    pub handler: CommandSpec,
    pub initialize: Option<CommandSpec>,
    pub shutdown: Option<CommandSpec>,
    /// Executables that must be on `PATH`.
    pub requires: Vec<String>,
    /// Per-call timeout for this plugin's tools.
    pub timeout_secs: Option<u64>,
}

impl PluginManifest {
    pub fn from_file(path: &Path) -> Result<Self, PluginError> {
        let text = std::fs::read_to_string(path).map_err(|source| PluginError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse and validate manifest text; `path` is used for error messages.
    pub fn parse(text: &str, path: &Path) -> Result<Self, PluginError> {
        let raw: RawManifest = serde_json::from_str(text).map_err(|source| PluginError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let fallback = unit_name(path);
        let invalid = |plugin: &str, reason: &str| PluginError::InvalidManifest {
            plugin: plugin.to_string(),
            reason: reason.to_string(),
        };

        let name = non_empty(raw.name).ok_or_else(|| invalid(&fallback, "missing 'name'"))?;
        let version = non_empty(raw.version).ok_or_else(|| invalid(&name, "missing 'version'"))?;
        let description =
            non_empty(raw.description).ok_or_else(|| invalid(&name, "missing 'description'"))?;
        let author = non_empty(raw.author).ok_or_else(|| invalid(&name, "missing 'author'"))?;
        let raw_tools = raw.tools.ok_or_else(|| invalid(&name, "missing 'tools' array"))?;
        let handler = raw.handler.ok_or_else(|| invalid(&name, "missing 'handler'"))?;
        if handler.command.trim().is_empty() {
            return Err(invalid(&name, "handler command is empty"));
        }

        if !is_semver(&version) {
            warn!(plugin = %name, version = %version, "plugin version is not semver");
        }

        let tools = raw_tools
            .iter()
            .map(|t| parse_tool(&name, t))
            .collect::<Result<Vec<_>, _>>()?;
        {
            let mut seen = std::collections::HashSet::new();
            if let Some(dup) = tools.iter().find(|t| !seen.insert(t.name.as_str())) {
                return Err(invalid(&name, &format!("tool '{}' declared twice", dup.name)));
            }
        }

        Ok(Self {
            name,
            version,
            description,
            author,
            tools,
            handler,
            initialize: raw.initialize,
            shutdown: raw.shutdown,
            requires: raw.requires,
            timeout_secs: raw.timeout_secs,
        })
    }
}

/// Accepts `{name, description, parameters}` or the chat-completions form
/// `{type: "function", function: {...}}`.
fn parse_tool(plugin: &str, value: &Value) -> Result<ToolDefinition, PluginError> {
    let body = if value.get("type").and_then(Value::as_str) == Some("function") {
        value.get("function").unwrap_or(&Value::Null)
    } else {
        value
    };
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| PluginError::InvalidManifest {
            plugin: plugin.to_string(),
            reason: format!("tool entry without a string name: {}", value),
        })?;
    let description = body.get("description").and_then(Value::as_str).unwrap_or("");
    let parameters = body
        .get("parameters")
        .cloned()
        .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
    Ok(ToolDefinition::new(name, description, parameters))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn is_semver(version: &str) -> bool {
    let core = version.split(['-', '+']).next().unwrap_or("");
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Display name for a unit whose manifest has no usable name.
fn unit_name(path: &Path) -> String {
    let stem = if path.file_name().and_then(|f| f.to_str()) == Some(MANIFEST_FILE) {
        path.parent().and_then(|p| p.file_name())
    } else {
        path.file_stem()
    };
    stem.map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Process-backed handler
// ---------------------------------------------------------------------------

/// Runs a plugin's handler command for each call.
pub struct ProcessHandler {
    plugin: String,
    dir: PathBuf,
    spec: CommandSpec,
    timeout: Option<Duration>,
}

impl ProcessHandler {
    pub fn new(plugin: impl Into<String>, dir: PathBuf, spec: CommandSpec, timeout: Option<Duration>) -> Self {
        Self {
            plugin: plugin.into(),
            dir,
            spec,
            timeout,
        }
    }
}

#[async_trait]
impl ToolFn for ProcessHandler {
    async fn call(&self, tool: &str, arguments: Value, ctx: &AgentContext) -> Result<String> {
        let payload = json!({
            "tool": tool,
            "arguments": arguments,
            "context": ctx,
        });
        let mut line = serde_json::to_vec(&payload)?;
        line.push(b'\n');

        let mut child = self
            .spec
            .to_command(&self.dir)
            .env("CORTEX_TOOL", tool)
            .env("CORTEX_PLUGIN", &self.plugin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn handler '{}' for plugin '{}'", self.spec.command, self.plugin))?;

        if let Some(mut stdin) = child.stdin.take() {
            // Handlers that ignore stdin may exit before reading it.
            if let Err(e) = stdin.write_all(&line).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e).context("failed to write tool call to handler stdin");
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for plugin handler")?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !stderr.is_empty() {
            debug!(plugin = %self.plugin, tool, stderr = %stderr, "plugin handler stderr");
        }
        if !output.status.success() && stdout.is_empty() {
            bail!("plugin handler exited with {}: {}", output.status, stderr);
        }
        Ok(stdout)
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

async fn run_hook(plugin: &str, hook: &str, dir: &Path, spec: &CommandSpec) -> Result<()> {
    let mut cmd = spec.to_command(dir);
    cmd.env("CORTEX_PLUGIN", plugin)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {} hook '{}'", hook, spec.command))?;
    let output = tokio::time::timeout(HOOK_TIMEOUT, child.wait_with_output())
        .await
        .with_context(|| format!("{} hook timed out", hook))??;
    if !output.status.success() {
        bail!(
            "{} hook exited with {}: {}",
            hook,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// A plugin that passed validation and initialization.
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub manifest: PluginManifest,
    /// Bundle directory (handler working directory).
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    /// Entries this plugin replaced; restored when it is unloaded.
    displaced: Vec<RegisteredTool>,
}

impl LoadedPlugin {
    pub fn tool_names(&self) -> Vec<String> {
        self.manifest.tools.iter().map(|t| t.name.clone()).collect()
    }
}

/// Per-plugin line of the stats report.
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub tools: Vec<String>,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginStats {
    pub total_plugins: usize,
    pub total_tools: usize,
    pub plugins: Vec<PluginSummary>,
}

pub struct PluginLoader {
    dirs: Vec<PathBuf>,
    registry: SharedRegistry,
    loaded: Vec<LoadedPlugin>,
}

impl PluginLoader {
    pub fn new(dirs: Vec<PathBuf>, registry: SharedRegistry) -> Self {
        Self {
            dirs,
            registry,
            loaded: Vec::new(),
        }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.loaded
    }

    /// Discover and load every bundle in the configured directories.
    /// Returns how many plugins were loaded by this call.
    pub async fn load_all(&mut self) -> usize {
        let before = self.loaded.len();
        for dir in self.dirs.clone() {
            for manifest_path in discover(&dir).await {
                if let Err(e) = self.load_unit(&manifest_path).await {
                    error!(path = %manifest_path.display(), err = %e, "failed to load plugin");
                }
            }
        }
        let count = self.loaded.len() - before;
        info!(
            plugins = self.loaded.len(),
            tools = self.loaded.iter().map(|p| p.manifest.tools.len()).sum::<usize>(),
            "plugin discovery finished"
        );
        count
    }

    /// Load a single manifest. A duplicate plugin name is skipped, not an error.
    pub async fn load_unit(&mut self, manifest_path: &Path) -> Result<(), PluginError> {
        let manifest = PluginManifest::from_file(manifest_path)?;

        if self.loaded.iter().any(|p| p.manifest.name == manifest.name) {
            warn!(plugin = %manifest.name, path = %manifest_path.display(), "plugin already loaded, skipping");
            return Ok(());
        }

        for command in &manifest.requires {
            if which::which(command).is_err() {
                return Err(PluginError::MissingDependency {
                    plugin: manifest.name.clone(),
                    command: command.clone(),
                });
            }
        }

        for tool in &manifest.tools {
            validate_definition(tool).map_err(|source| PluginError::Registry {
                plugin: manifest.name.clone(),
                tool: tool.name.clone(),
                source,
            })?;
        }

        let dir = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(ref init) = manifest.initialize {
            run_hook(&manifest.name, "initialize", &dir, init)
                .await
                .map_err(|e| PluginError::InitFailed {
                    plugin: manifest.name.clone(),
                    reason: format!("{:#}", e),
                })?;
        }

        let handler: Arc<dyn ToolFn> = Arc::new(ProcessHandler::new(
            manifest.name.clone(),
            dir.clone(),
            manifest.handler.clone(),
            manifest.timeout_secs.map(Duration::from_secs),
        ));

        let mut displaced = Vec::new();
        {
            let mut registry = self.registry.write().await;
            for tool in &manifest.tools {
                // Only entries owned by someone else are restored on unload.
                if let Some(existing) = registry.get(&tool.name) {
                    if existing.handler.source() != manifest.name {
                        displaced.push(existing.clone());
                    }
                }
                registry
                    .register(tool.clone(), ToolHandler::dynamic(manifest.name.clone(), handler.clone()))
                    .map_err(|source| PluginError::Registry {
                        plugin: manifest.name.clone(),
                        tool: tool.name.clone(),
                        source,
                    })?;
            }
        }

        info!(
            plugin = %manifest.name,
            version = %manifest.version,
            tools = manifest.tools.len(),
            "loaded plugin"
        );
        self.loaded.push(LoadedPlugin {
            manifest,
            dir,
            manifest_path: manifest_path.to_path_buf(),
            displaced,
        });
        Ok(())
    }

    pub fn stats(&self) -> PluginStats {
        let plugins: Vec<PluginSummary> = self
            .loaded
            .iter()
            .map(|p| PluginSummary {
                name: p.manifest.name.clone(),
                version: p.manifest.version.clone(),
                author: p.manifest.author.clone(),
                description: p.manifest.description.clone(),
                tools: p.tool_names(),
                path: p.manifest_path.clone(),
            })
            .collect();
        PluginStats {
            total_plugins: plugins.len(),
            total_tools: plugins.iter().map(|p| p.tools.len()).sum(),
            plugins,
        }
    }

    /// Unload everything and discover again.
    pub async fn reload(&mut self) -> usize {
        info!("reloading plugins");
        self.unload_all().await;
        self.load_all().await
    }

    /// Run shutdown hooks. Tools stay registered.
    pub async fn shutdown(&self) {
        for plugin in &self.loaded {
            if let Some(ref hook) = plugin.manifest.shutdown {
                if let Err(e) = run_hook(&plugin.manifest.name, "shutdown", &plugin.dir, hook).await {
                    warn!(plugin = %plugin.manifest.name, err = %e, "plugin shutdown hook failed");
                }
            }
        }
    }

    async fn unload_all(&mut self) {
        self.shutdown().await;
        let mut registry = self.registry.write().await;
        // Reverse order so entries displaced by an earlier plugin are restored last.
        for plugin in self.loaded.drain(..).rev() {
            let removed = registry.unregister_source(&plugin.manifest.name);
            debug!(plugin = %plugin.manifest.name, removed, "unloaded plugin");
            for entry in plugin.displaced {
                if !registry.has_handler(&entry.definition.name) {
                    if let Err(e) = registry.register(entry.definition, entry.handler) {
                        warn!(err = %e, "failed to restore displaced tool");
                    }
                }
            }
        }
    }
}

/// Manifest paths in `dir`, sorted by file name. Missing directories yield nothing.
async fn discover(dir: &Path) -> Vec<PathBuf> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(r) => r,
        Err(e) => {
            debug!(dir = %dir.display(), err = %e, "plugin directory not readable, skipping");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    loop {
        let entry = match reader.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), err = %e, "error while scanning plugin directory");
                break;
            }
        };
        let path = entry.path();
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        if file_type.is_dir() {
            let manifest = path.join(MANIFEST_FILE);
            if tokio::fs::metadata(&manifest).await.is_ok() {
                found.push(manifest);
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            found.push(path);
        }
    }
    found.sort();
    found
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
