use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use discord::{DEFAULT_API_BASE, FeedSettings};
use ingest::{SnapshotSource, WalkConfig};
use serde::{Deserialize, Deserializer};

pub const TOKEN_ENV: &str = "CASEBOOK_FEED_TOKEN";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub db_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// File path or http(s) URL of the seed case list.
    pub snapshot: Option<String>,
    pub superadmin_email: Option<String>,
    #[serde(deserialize_with = "humantime_duration")]
    pub public_cooldown: Duration,
    pub feed: FeedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: None,
            cache_dir: None,
            snapshot: None,
            superadmin_email: None,
            public_cooldown: Duration::ZERO,
            feed: FeedConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub api_base: String,
    pub channel_id: String,
    pub token: Option<String>,
    pub page_delay_ms: u64,
    pub default_retry_after_secs: f64,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            channel_id: String::new(),
            token: None,
            page_delay_ms: 500,
            default_retry_after_secs: 5.0,
            timeout_secs: 30,
        }
    }
}

fn humantime_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("casebook")
            .join("config.toml")
    }

    /// Reads `path` (or the default location); a missing file yields the
    /// defaults. The feed token environment variable wins over the file.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config file at {}", config_path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("failed to parse config file {}", config_path.display()))?
        } else if path.is_some() {
            anyhow::bail!("config file not found: {}", config_path.display());
        } else {
            Self::default()
        };
        config.apply_token_override(std::env::var(TOKEN_ENV).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.feed.token = Some(token);
        }
    }

    pub fn snapshot_source(&self) -> Option<SnapshotSource> {
        self.snapshot
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SnapshotSource::parse)
    }

    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            api_base: self.feed.api_base.clone(),
            channel_id: self.feed.channel_id.clone(),
            token: self.feed.token.clone().unwrap_or_default(),
            timeout: Duration::from_secs(self.feed.timeout_secs.max(1)),
        }
    }

    pub fn walk_config(&self) -> WalkConfig {
        let retry = self.feed.default_retry_after_secs;
        let default_retry_after = if retry.is_finite() && retry >= 0.0 {
            Duration::from_secs_f64(retry)
        } else {
            WalkConfig::default().default_retry_after
        };
        WalkConfig {
            page_delay: Duration::from_millis(self.feed.page_delay_ms),
            default_retry_after,
            ..WalkConfig::default()
        }
    }

    pub fn feed_configured(&self) -> bool {
        !self.feed.channel_id.trim().is_empty()
            && self.feed.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}
