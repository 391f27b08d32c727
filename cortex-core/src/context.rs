//! Agent Context
//!
//! Snapshot of the live external state the assistant works against: the
//! active project and target, working directory and host user. It is passed
//! explicitly to system-prompt rendering and to every tool handler.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The engagement currently loaded, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectInfo {
    /// Project name.
    pub name: String,
    /// Primary target (host, URL or CIDR range).
    #[serde(default)]
    pub target: Option<String>,
    /// In-scope patterns, as declared by the user.
    #[serde(default)]
    pub scope: Vec<String>,
}

impl ProjectInfo {
    /// One-line summary injected into the system prompt.
    pub fn summary(&self) -> String {
        let mut s = self.name.clone();
        if let Some(ref target) = self.target {
            s.push_str(&format!(" (target: {})", target));
        }
        if !self.scope.is_empty() {
            s.push_str(&format!(" [scope: {}]", self.scope.join(", ")));
        }
        s
    }
}

/// Context snapshot taken at the start of each turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentContext {
    pub project: Option<ProjectInfo>,
    pub working_dir: PathBuf,
    pub user: String,
    pub home: Option<PathBuf>,
    pub os: String,
}

impl AgentContext {
    /// Capture the current process environment.
    pub fn detect() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            project: None,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            user,
            home: dirs::home_dir(),
            os: std::env::consts::OS.to_string(),
        }
    }

    pub fn with_project(mut self, project: Option<ProjectInfo>) -> Self {
        self.project = project;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Resolve a tool-supplied path against the working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}
