//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.quill/config.json`) and
//! environment. Secrets (bot token, API key) can live in the file but are
//! overridden by environment variables when set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::assistant::PollPolicy;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Discord connection settings.
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Assistant backend settings.
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Session store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Discord bot credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Bot token. Overridden by DISCORD_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// Application id used for slash-command registration. Overridden by
    /// DISCORD_APPLICATION_ID env when set.
    pub application_id: Option<String>,
}

/// Assistant backend credentials and run-poll pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    /// API key. Overridden by OPENAI_API_KEY env when set.
    pub api_key: Option<String>,
    /// Assistant to run against each thread. Overridden by ASSISTANT_ID env when set.
    pub assistant_id: Option<String>,
    /// Override the backend base URL (for tests or proxies).
    pub base_url: Option<String>,

    /// Seconds between the first and second run-status checks (doubles per round).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Cap on the per-round poll delay, seconds.
    #[serde(default = "default_poll_max_interval_secs")]
    pub poll_max_interval_secs: u64,
    /// Total budget before a run is treated as timed out, seconds.
    #[serde(default = "default_poll_max_wait_secs")]
    pub poll_max_wait_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_poll_max_interval_secs() -> u64 {
    10
}

fn default_poll_max_wait_secs() -> u64 {
    120
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            assistant_id: None,
            base_url: None,
            poll_interval_secs: default_poll_interval_secs(),
            poll_max_interval_secs: default_poll_max_interval_secs(),
            poll_max_wait_secs: default_poll_max_wait_secs(),
        }
    }
}

impl AssistantConfig {
    /// Poll pacing for the run driver.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            max_interval: Duration::from_secs(self.poll_max_interval_secs.max(1)),
            max_wait: Duration::from_secs(self.poll_max_wait_secs.max(1)),
        }
    }
}

/// Session store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Path to the sessions file (default: sessions.json next to the config file).
    pub path: Option<PathBuf>,
}

fn env_override(var: &str) -> Option<String> {
    std::env::var(var).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn from_config(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the Discord bot token: env DISCORD_BOT_TOKEN overrides config.
pub fn resolve_bot_token(config: &Config) -> Option<String> {
    env_override("DISCORD_BOT_TOKEN").or_else(|| from_config(config.discord.bot_token.as_ref()))
}

/// Resolve the Discord application id: env DISCORD_APPLICATION_ID overrides config.
pub fn resolve_application_id(config: &Config) -> Option<String> {
    env_override("DISCORD_APPLICATION_ID")
        .or_else(|| from_config(config.discord.application_id.as_ref()))
}

/// Resolve the assistant API key: env OPENAI_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    env_override("OPENAI_API_KEY").or_else(|| from_config(config.assistant.api_key.as_ref()))
}

/// Resolve the assistant id: env ASSISTANT_ID overrides config.
pub fn resolve_assistant_id(config: &Config) -> Option<String> {
    env_override("ASSISTANT_ID").or_else(|| from_config(config.assistant.assistant_id.as_ref()))
}

/// Resolve config path from env or default (~/.quill/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("QUILL_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".quill").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the session store path: config override or sessions.json next to
/// the config file.
pub fn resolve_store_path(config: &Config, config_path: &std::path::Path) -> PathBuf {
    if let Some(p) = &config.store.path {
        if !p.as_os_str().is_empty() {
            return p.clone();
        }
    }
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("sessions.json")
}

/// Load config from the default path (or QUILL_CONFIG_PATH). Missing file =>
/// default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
