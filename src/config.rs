use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when `upstream.api_key` is not set.
pub const API_KEY_ENV: &str = "COMPRAS_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_detail_fanout")]
    pub detail_fanout: usize,
    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,
    #[serde(default = "default_max_pages_per_window")]
    pub max_pages_per_window: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            page_limit: default_page_limit(),
            detail_fanout: default_detail_fanout(),
            detail_concurrency: default_detail_concurrency(),
            max_pages_per_window: default_max_pages_per_window(),
        }
    }
}

impl UpstreamConfig {
    /// Configured key, else the `COMPRAS_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

fn default_base_url() -> String {
    "https://api.dgcp.gob.do/api".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_limit() -> u32 {
    100
}
fn default_detail_fanout() -> usize {
    20
}
fn default_detail_concurrency() -> usize {
    4
}
fn default_max_pages_per_window() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_window_days() -> u32 {
    7
}
fn default_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_format() -> String {
    "text".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate upstream
    reqwest::Url::parse(&config.upstream.base_url).with_context(|| {
        format!(
            "upstream.base_url is not a valid URL: '{}'",
            config.upstream.base_url
        )
    })?;
    if config.upstream.page_limit == 0 {
        anyhow::bail!("upstream.page_limit must be >= 1");
    }
    if config.upstream.max_pages_per_window == 0 {
        anyhow::bail!("upstream.max_pages_per_window must be >= 1");
    }
    if config.upstream.detail_concurrency == 0 {
        anyhow::bail!("upstream.detail_concurrency must be >= 1");
    }

    // Validate ingest
    if config.ingest.window_days == 0 {
        anyhow::bail!("ingest.window_days must be >= 1");
    }

    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!(
            "Unknown logging format: '{}'. Must be text or json.",
            other
        ),
    }

    Ok(config)
}
