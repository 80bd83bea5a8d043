use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_reddit_base_url")]
    pub base_url: String,

    #[serde(default = "default_link_base_url")]
    pub link_base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_discord_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "default_max_posts")]
    pub max_posts: u32,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default)]
    pub json_format: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|_| {
            Error::Config(format!(
                "Configuration file not found: {}",
                path.as_ref().display()
            ))
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval == 0 {
            return Err(Error::Config(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.monitor.max_posts == 0 {
            return Err(Error::Config(
                "Max posts must be greater than 0".to_string(),
            ));
        }

        if self.monitor.cache_capacity == 0 {
            return Err(Error::Config(
                "Cache capacity must be greater than 0".to_string(),
            ));
        }

        if self.reddit.user_agent.is_empty() {
            return Err(Error::Config("User agent cannot be empty".to_string()));
        }

        for base in [
            &self.reddit.base_url,
            &self.reddit.link_base_url,
            &self.discord.api_base_url,
        ] {
            url::Url::parse(base).map_err(|_| Error::InvalidUrl(base.clone()))?;
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SUBWATCH_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Ok(interval) = std::env::var("SUBWATCH_POLL_INTERVAL") {
            if let Ok(val) = interval.parse() {
                self.monitor.poll_interval = val;
            }
        }

        if let Ok(level) = std::env::var("SUBWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            if !token.is_empty() {
                self.discord.token = token;
            }
        }
    }

    pub fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            reddit: RedditConfig::default(),
            discord: DiscordConfig::default(),
            monitor: MonitorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("subwatch"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("subwatch"))
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            base_url: default_reddit_base_url(),
            link_base_url: default_link_base_url(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            rate_limit_backoff: default_rate_limit_backoff(),
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_discord_api_base_url(),
            token: String::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_posts: default_max_posts(),
            cache_ttl: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: false,
            log_file: default_log_file(),
            json_format: false,
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("subwatch").join("subwatch.db"))
        .unwrap_or_else(|| PathBuf::from("subwatch.db"))
}

fn default_reddit_base_url() -> String {
    "https://www.reddit.com".to_string()
}
fn default_link_base_url() -> String {
    "https://reddit.com".to_string()
}
fn default_user_agent() -> String {
    format!("subwatch/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout() -> u64 {
    30
}
fn default_rate_limit_backoff() -> u64 {
    60
}

fn default_discord_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_poll_interval() -> u64 {
    120
}
fn default_max_posts() -> u32 {
    100
}
fn default_cache_ttl() -> u64 {
    600
}
fn default_cache_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_file() -> String {
    "logs/subwatch.log".to_string()
}
