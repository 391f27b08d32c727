//! Conversation History Persistence
//!
//! Save and load the conversation (everything except the system prompt) so
//! a REPL session can pick up where the last one ended.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{Message, Role};

/// On-disk form of the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedHistory {
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// Trait for history persistence backends.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load the saved conversation; empty when nothing was saved yet.
    async fn load(&self) -> Result<Vec<Message>>;

    async fn save(&self, messages: &[Message]) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// File-based store
// ---------------------------------------------------------------------------

/// Stores history as a pretty-printed JSON file.
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self) -> Result<Vec<Message>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no history file yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read history file: {}", self.path.display()))
            }
        };
        let history: PersistedHistory = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse history file: {}", self.path.display()))?;
        let messages: Vec<Message> = history
            .messages
            .into_iter()
            .filter(|m| m.role != Role::System)
            .collect();
        info!(path = %self.path.display(), messages = messages.len(), "loaded history");
        Ok(messages)
    }

    async fn save(&self, messages: &[Message]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create history dir: {}", parent.display()))?;
        }
        let history = PersistedHistory {
            updated_at: Utc::now(),
            messages: messages.to_vec(),
        };
        let json = serde_json::to_string_pretty(&history).context("failed to serialize history")?;

        // Write to a sibling file first so a crash never leaves a half-written history.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write history file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace history file: {}", self.path.display()))?;

        debug!(path = %self.path.display(), messages = messages.len(), "saved history");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete history file: {}", self.path.display())),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps history for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryHistoryStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?
            .clone())
    }

    async fn save(&self, messages: &[Message]) -> Result<()> {
        *self
            .messages
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))? = messages.to_vec();
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.messages
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?
            .clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
