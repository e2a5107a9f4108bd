use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

/// Remote music catalog the agent searches and downloads from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    /// Static access token, sent as `Authorization: OAuth <token>`.
    #[serde(default)]
    pub token: Option<String>,
    /// Candidates shown per section of a choice list.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_bitrate")]
    pub bitrate_kbps: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Prefix marking chat text as a command, e.g. `]p daft punk`.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Channel joined by `play` when nobody ran `join` first.
    #[serde(default = "default_channel")]
    pub default_channel: String,
    /// Upper bound between sink state checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long a choice list waits for its reply.
    #[serde(default = "default_selection_timeout")]
    pub selection_timeout_secs: u64,
}

/// User-configurable paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of downloaded media; each session gets its own subdirectory.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            token: None,
            search_limit: default_search_limit(),
            bitrate_kbps: default_bitrate(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            default_channel: default_channel(),
            poll_interval_ms: default_poll_interval(),
            selection_timeout_secs: default_selection_timeout(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8988
}

fn default_volume() -> f32 {
    0.5
}

fn default_catalog_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_search_limit() -> usize {
    4
}

fn default_bitrate() -> u32 {
    192
}

fn default_request_timeout() -> u64 {
    30
}

fn default_command_prefix() -> String {
    "]".to_string()
}

fn default_channel() -> String {
    "general".to_string()
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_selection_timeout() -> u64 {
    120
}

fn default_media_dir() -> PathBuf {
    platform::cache_dir().join("media")
}

impl Config {
    /// Load from the default location, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
