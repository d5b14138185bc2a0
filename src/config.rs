use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Wait budgets and timeouts. Each is independently configurable; exceeding
/// one produces a recorded error for the affected file(s), never a process
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Seconds between transcode status polls
    #[serde(default = "default_poll_secs")]
    pub transcode_poll_secs: u64,

    /// Per-file transcode wait budget in seconds
    #[serde(default = "default_transcode_wait")]
    pub transcode_wait_secs: u64,

    /// Total wait budget for a whole batch of transcodes, in seconds
    #[serde(default = "default_batch_wait")]
    pub batch_wait_secs: u64,

    /// Timeout for ordinary API calls, in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Timeout for audio byte transfers, in seconds
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

fn default_poll_secs() -> u64 {
    5
}

fn default_transcode_wait() -> u64 {
    600
}

fn default_batch_wait() -> u64 {
    1800
}

fn default_http_timeout() -> u64 {
    30
}

fn default_transfer_timeout() -> u64 {
    120
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            transcode_poll_secs: default_poll_secs(),
            transcode_wait_secs: default_transcode_wait(),
            batch_wait_secs: default_batch_wait(),
            http_timeout_secs: default_http_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
        }
    }
}

impl Limits {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.transcode_poll_secs)
    }

    pub fn transcode_wait(&self) -> Duration {
        Duration::from_secs(self.transcode_wait_secs)
    }

    pub fn batch_wait(&self) -> Duration {
        Duration::from_secs(self.batch_wait_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// OAuth client id issued by the card service's developer portal
    #[serde(default)]
    pub client_id: String,

    /// API host (default: https://api.yotoplay.com)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Auth host (default: https://login.yotoplay.com)
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    #[serde(default)]
    pub limits: Limits,
}

fn default_api_url() -> String {
    "https://api.yotoplay.com".to_string()
}

fn default_auth_url() -> String {
    "https://login.yotoplay.com".to_string()
}

/// Per-user state directory (~/.cardsmith)
pub fn state_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME not set")?;
    Ok(PathBuf::from(home).join(".cardsmith"))
}

fn config_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("config.toml"))
}

impl Config {
    /// Load config from ~/.cardsmith/config.toml, returning defaults if the file doesn't exist
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Save config to ~/.cardsmith/config.toml
    pub fn save(&self) -> Result<PathBuf> {
        let path = config_path()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            api_url: default_api_url(),
            auth_url: default_auth_url(),
            limits: Limits::default(),
        }
    }
}
