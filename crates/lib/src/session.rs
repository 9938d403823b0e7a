//! Session store: persisted bindings between chat channels and assistant threads.
//!
//! A session maps one (scope, channel) pair — e.g. a Discord guild and channel —
//! to the assistant thread that holds its conversation history. The store is a
//! JSON file re-read on every lookup so restarts and concurrent handlers observe
//! the same state; there is no in-memory cache. Absence of a session for a
//! channel means the bridge stays silent there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One active binding: channel + scope on the chat side, thread id on the
/// assistant side. Immutable once created; join-after-join replaces the whole
/// entry with a fresh thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub channel_id: String,
    pub scope_id: String,
    pub ai_thread_id: String,
    pub created_at: DateTime<Utc>,
}

/// File-backed store of sessions keyed by (scope_id, channel_id).
pub struct SessionStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the backing file.
    io: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            io: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> std::io::Result<Vec<Session>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(serde_json::from_str(&s).unwrap_or_else(|_| Vec::new())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn write_all(&self, entries: &[Session]) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await
    }

    /// Look up the assistant thread bound to a channel. Read failures degrade
    /// to `None`: the caller's policy for a missing session is silence, and a
    /// flaky store must not turn that into an error reply.
    pub async fn get(&self, channel_id: &str, scope_id: &str) -> Option<String> {
        let _g = self.io.lock().await;
        match self.read_all().await {
            Ok(entries) => entries
                .iter()
                .find(|e| e.channel_id == channel_id && e.scope_id == scope_id)
                .map(|e| e.ai_thread_id.clone()),
            Err(e) => {
                log::warn!("session store: read failed, treating as absent: {}", e);
                None
            }
        }
    }

    /// Bind a channel to an assistant thread, replacing any existing binding
    /// for the same (scope, channel). Persists immediately; errors propagate
    /// so join can report the failure to the user.
    pub async fn create(
        &self,
        channel_id: &str,
        ai_thread_id: &str,
        scope_id: &str,
    ) -> anyhow::Result<()> {
        let _g = self.io.lock().await;
        let mut entries = self.read_all().await?;
        entries.retain(|e| !(e.channel_id == channel_id && e.scope_id == scope_id));
        entries.push(Session {
            channel_id: channel_id.to_string(),
            scope_id: scope_id.to_string(),
            ai_thread_id: ai_thread_id.to_string(),
            created_at: Utc::now(),
        });
        self.write_all(&entries).await?;
        Ok(())
    }

    /// Remove the binding for a channel and persist. Removing an absent key
    /// succeeds; write errors propagate so leave can report the failure.
    pub async fn remove(&self, channel_id: &str, scope_id: &str) -> anyhow::Result<()> {
        let _g = self.io.lock().await;
        let mut entries = self.read_all().await?;
        let before = entries.len();
        entries.retain(|e| !(e.channel_id == channel_id && e.scope_id == scope_id));
        if entries.len() == before {
            return Ok(());
        }
        self.write_all(&entries).await?;
        Ok(())
    }
}
