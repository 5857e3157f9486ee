//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.tg-bridge/config.json`) and environment.
//! Every file key has a literal fallback; only the session credential is required, and it
//! comes from `TG_STRING_SESSION` so it never has to live in the config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::client::ChatId;

/// Environment variable holding the session credential (bot token or MTProto string session).
pub const SESSION_ENV: &str = "TG_STRING_SESSION";

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Application id from my.telegram.org (MTProto transport only). Overridden by TG_API_ID env.
    #[serde(default = "default_api_id")]
    pub api_id: i32,

    /// Application hash from my.telegram.org (MTProto transport only). Overridden by TG_API_HASH env.
    #[serde(default = "default_api_hash")]
    pub api_hash: String,

    /// Channel to read from, in marked form (`-100…`). Overridden by TG_SOURCE_CHAT_ID env.
    #[serde(default = "default_source_chat_id")]
    pub source_chat_id: ChatId,

    /// Channel to write to, in marked form (`-100…`). Overridden by TG_DEST_CHAT_ID env.
    #[serde(default = "default_dest_chat_id")]
    pub dest_chat_id: ChatId,

    /// Which client talks to Telegram: "botApi" (default) or "mtproto".
    #[serde(default)]
    pub transport: Transport,

    /// Log file, opened in append mode next to stdout logging.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Bot API base URL override (tests, local Bot API server). TELEGRAM_API_BASE env wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transport {
    /// Telegram Bot API over HTTPS; the session credential is a bot token.
    #[default]
    BotApi,

    /// User account over MTProto; the session credential is a string session from `tg-bridge session`.
    Mtproto,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::BotApi => write!(f, "botApi"),
            Transport::Mtproto => write!(f, "mtproto"),
        }
    }
}

fn default_api_id() -> i32 {
    12345678
}

fn default_api_hash() -> String {
    "1a2c3bdcf44444aa6f7e8bb99999c000".to_string()
}

fn default_source_chat_id() -> ChatId {
    -1001234567890
}

fn default_dest_chat_id() -> ChatId {
    -1009876543210
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/var/log/tg-bridge.log")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_id: default_api_id(),
            api_hash: default_api_hash(),
            source_chat_id: default_source_chat_id(),
            dest_chat_id: default_dest_chat_id(),
            transport: Transport::default(),
            log_file: default_log_file(),
            api_base: None,
        }
    }
}

/// Validation failures that stop the process before any connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("TG_STRING_SESSION environment variable is required")]
    MissingSession,
    #[error("source and destination are the same channel ({0})")]
    SameChannel(ChatId),
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("{0}")]
    UnsupportedTransport(String),
}

/// Read a trimmed, non-empty environment variable.
fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env_non_empty(var) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: v }),
        None => Ok(None),
    }
}

impl Config {
    /// Apply TG_API_ID, TG_API_HASH, TG_SOURCE_CHAT_ID, TG_DEST_CHAT_ID and TELEGRAM_API_BASE.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(id) = env_parse("TG_API_ID")? {
            self.api_id = id;
        }
        if let Some(hash) = env_non_empty("TG_API_HASH") {
            self.api_hash = hash;
        }
        if let Some(id) = env_parse("TG_SOURCE_CHAT_ID")? {
            self.source_chat_id = id;
        }
        if let Some(id) = env_parse("TG_DEST_CHAT_ID")? {
            self.dest_chat_id = id;
        }
        if let Some(base) = env_non_empty("TELEGRAM_API_BASE") {
            self.api_base = Some(base);
        }
        Ok(())
    }
}

/// Resolve the session credential from TG_STRING_SESSION (trimmed; blank counts as missing).
pub fn resolve_session() -> Option<String> {
    env_non_empty(SESSION_ENV)
}

/// Everything one bridge run needs, validated. Built fresh for every supervisor attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub source_chat_id: ChatId,
    pub dest_chat_id: ChatId,
    pub session: String,
    pub transport: Transport,
    pub api_base: Option<String>,
}

impl BridgeConfig {
    /// Validate the required field set: a non-blank session credential and two distinct channels.
    pub fn from_config(config: &Config, session: Option<String>) -> Result<Self, ConfigError> {
        let session = session
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSession)?;
        if config.source_chat_id == config.dest_chat_id {
            return Err(ConfigError::SameChannel(config.source_chat_id));
        }
        Ok(Self {
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            source_chat_id: config.source_chat_id,
            dest_chat_id: config.dest_chat_id,
            session,
            transport: config.transport,
            api_base: config.api_base.clone(),
        })
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("api_id", &self.api_id)
            .field("api_hash", &mask_secret(&self.api_hash))
            .field("source_chat_id", &self.source_chat_id)
            .field("dest_chat_id", &self.dest_chat_id)
            .field("session", &mask_secret(&self.session))
            .field("transport", &self.transport)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Keep the first 8 characters of a secret for recognition, hide the rest.
pub fn mask_secret(secret: &str) -> String {
    let head: String = secret.chars().take(8).collect();
    if secret.chars().count() > 8 {
        format!("{}...", head)
    } else {
        "***".to_string()
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TG_BRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".tg-bridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default path), then apply env overrides.
/// Missing file => literal defaults. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config
        .apply_env_overrides()
        .context("applying environment overrides")?;
    Ok((config, path))
}
