//! Typed errors for registration and plugin loading.
//!
//! Everything else in the crate uses `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Rejected tool registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid tool descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid handler for tool '{tool}': {reason}")]
    InvalidHandler { tool: String, reason: String },
}

/// Why a single plugin unit failed to load.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("plugin '{plugin}' manifest: {reason}")]
    InvalidManifest { plugin: String, reason: String },

    #[error("plugin '{plugin}' requires '{command}' which is not on PATH")]
    MissingDependency { plugin: String, command: String },

    #[error("plugin '{plugin}' failed to initialize: {reason}")]
    InitFailed { plugin: String, reason: String },

    #[error("plugin '{plugin}' tool '{tool}': {source}")]
    Registry {
        plugin: String,
        tool: String,
        #[source]
        source: RegistryError,
    },
}
