use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_news_of_the_day_limit")]
    pub news_of_the_day_limit: usize,
    #[serde(default = "default_category_feed_limit")]
    pub category_feed_limit: usize,
    #[serde(default)]
    pub store: StoreConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub labels: Labels,
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_categories() -> Vec<String> {
    [
        "Man City",
        "Liverpool",
        "Chelsea",
        "Man Utd",
        "Arsenal",
        "Leicester City",
        "Aston Villa",
        "Tottenham",
        "West Ham",
        "Wolves",
        "Newcastle",
        "Brighton",
        "Brentford",
        "Southampton",
        "Crystal Palace",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_news_of_the_day_limit() -> usize {
    10
}

fn default_category_feed_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// JSON documents imported into the store at startup
    pub seed_file: Option<PathBuf>,
}

fn default_database_url() -> String {
    "sqlite:matchday_news.db?mode=rwc".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            seed_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    /// Zero disables the timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub skip_network_on_disk_hit: bool,
    #[serde(default)]
    pub write_back: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            skip_network_on_disk_hit: false,
            write_back: false,
        }
    }
}

/// Display labels for the article news type
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Labels {
    #[serde(default = "default_breaking_news")]
    pub breaking_news: String,
    #[serde(default = "default_news_of_the_day")]
    pub news_of_the_day: String,
}

fn default_breaking_news() -> String {
    "Breaking News".to_string()
}

fn default_news_of_the_day() -> String {
    "News of the Day".to_string()
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            breaking_news: default_breaking_news(),
            news_of_the_day: default_news_of_the_day(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.categories.is_empty() {
            anyhow::bail!("at least one category must be configured");
        }
        Ok(config)
    }
}
