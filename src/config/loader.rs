/// Configuration loading from TOML file with environment overrides
use std::path::Path;

use crate::config::{
    Config, DEFAULT_BACKFILL_CHUNK_MINUTES, DEFAULT_BACKFILL_SLEEP_MS, DEFAULT_BASE_URL,
    DEFAULT_DATA_DIR, DEFAULT_INTERVAL_SECS, DEFAULT_LOG_LEVEL, DEFAULT_RATE_LIMIT_RPS,
    DEFAULT_TIMEOUT_SECS,
};
use crate::error::{IngestError, Result};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| IngestError::ConfigError(format!("Failed to read config file: {}", e)))?;

    load_config_from_str(&content, |key| std::env::var(key).ok())
}

/// Parse, apply environment overrides, fill defaults and validate
pub fn load_config_from_str<F>(content: &str, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)
        .map_err(|e| IngestError::ConfigError(format!("Failed to parse config: {}", e)))?;

    apply_env_overrides(&mut config, env);
    apply_defaults(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn apply_env_overrides<F>(config: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = |key: &str| env(key).and_then(|v| v.trim().parse::<u64>().ok());
    let flag = |key: &str| env(key).and_then(|v| v.trim().parse::<bool>().ok());

    if let Some(v) = parsed("JOB_INTERVAL_SECONDS") {
        config.job.interval_seconds = v;
    }
    if let Some(v) = flag("JOB_ENABLED") {
        config.job.enabled = Some(v);
    }
    if let Some(v) = parsed("API_TIMEOUT_SECONDS") {
        config.api.timeout_seconds = v;
    }
    if let Some(v) = env("API_RATE_LIMIT_RPS").and_then(|v| v.trim().parse::<u32>().ok()) {
        config.api.rate_limit_rps = v;
    }
    if let Some(v) = env("COINGECKO_API_KEY") {
        config.coingecko.api_key = v;
    }
    if let Some(v) = env("COINGECKO_BASE_URL") {
        config.coingecko.base_url = v;
    }
    if let Some(v) = flag("BACKFILL_ENABLED") {
        config.backfill.enabled = v;
    }
    if let Some(v) = env("BACKFILL_START_FROM") {
        config.backfill.start_from = v;
    }
    if let Some(v) = parsed("BACKFILL_SLEEP_MS") {
        config.backfill.sleep_ms = v;
    }
    if let Some(v) = parsed("BACKFILL_CHUNK_MINUTES") {
        config.backfill.chunk_minutes = v;
    }
    if let Some(v) = env("STORAGE_DATA_DIR") {
        config.storage.data_dir = v;
    }
    if let Some(v) = env("LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = flag("LOG_JSON") {
        config.logging.json = v;
    }
}

fn apply_defaults(config: &mut Config) {
    if config.job.interval_seconds == 0 {
        config.job.interval_seconds = DEFAULT_INTERVAL_SECS;
    }
    if config.api.timeout_seconds == 0 {
        config.api.timeout_seconds = DEFAULT_TIMEOUT_SECS;
    }
    if config.api.rate_limit_rps == 0 {
        config.api.rate_limit_rps = DEFAULT_RATE_LIMIT_RPS;
    }
    if config.coingecko.base_url.trim().is_empty() {
        config.coingecko.base_url = DEFAULT_BASE_URL.to_string();
    }
    if config.backfill.sleep_ms == 0 {
        config.backfill.sleep_ms = DEFAULT_BACKFILL_SLEEP_MS;
    }
    if config.backfill.chunk_minutes == 0 {
        config.backfill.chunk_minutes = DEFAULT_BACKFILL_CHUNK_MINUTES;
    }
    if config.storage.data_dir.trim().is_empty() {
        config.storage.data_dir = DEFAULT_DATA_DIR.to_string();
    }
    if config.logging.level.trim().is_empty() {
        config.logging.level = DEFAULT_LOG_LEVEL.to_string();
    }
}

fn validate_config(config: &Config) -> Result<()> {
    let url = reqwest::Url::parse(config.coingecko.base_url.trim()).map_err(|e| {
        IngestError::ConfigError(format!(
            "Invalid coingecko.base_url '{}': {}",
            config.coingecko.base_url, e
        ))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(IngestError::ConfigError(format!(
            "coingecko.base_url must be http(s), got '{}'",
            url.scheme()
        )));
    }

    Ok(())
}
