/// Service configuration and per-token resolution
pub mod loader;

pub use loader::{load_config, load_config_from_str};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{IngestError, Result};
use crate::types::Token;
use crate::utils::time::parse_start_from;

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 100;
pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_BACKFILL_SLEEP_MS: u64 = 3000;
pub const DEFAULT_BACKFILL_CHUNK_MINUTES: u64 = 5;
pub const DEFAULT_MIN_TIME_RANGE_SECS: u64 = 60;
pub const DEFAULT_MAX_CHUNK_MINUTES: u64 = 60;
pub const DEFAULT_DATA_DIR: &str = "data/quotes";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Root configuration, loaded once at process start
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub job: JobConfig,
    pub api: ApiConfig,
    pub coingecko: CoinGeckoConfig,
    pub backfill: BackfillConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub tokens: HashMap<String, TokenConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub interval_seconds: u64,
    /// Live collection switch; unset means enabled
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub timeout_seconds: u64,
    pub rate_limit_rps: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoinGeckoConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    pub enabled: bool,
    /// RFC3339 timestamp or YYYY-MM-DD
    pub start_from: String,
    pub sleep_ms: u64,
    pub chunk_minutes: u64,
    pub gate: BackfillGate,
}

/// How live collection waits on backfill
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillGate {
    /// Each token starts collecting once its own backfill is done
    #[default]
    PerToken,
    /// No token starts collecting until every backfill is done
    Global,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Per-token overrides; zero or empty fields inherit from the global scope
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub interval_seconds: u64,
    pub enabled: Option<bool>,
    pub timeout_seconds: u64,
    pub min_time_range_seconds: u64,
    /// Upper bound on this token's backfill chunk
    pub max_chunk_minutes: u64,
    /// Provider coin id override
    pub coin_id: Option<String>,
    pub backfill: TokenBackfillConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenBackfillConfig {
    pub enabled: Option<bool>,
    pub start_from: String,
    pub sleep_ms: u64,
    pub chunk_minutes: u64,
}

/// Fully resolved settings for one token
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub token: Token,
    pub enabled: bool,
    pub interval: std::time::Duration,
    pub timeout: std::time::Duration,
    pub min_time_range: Duration,
    pub max_chunk: Duration,
    pub backfill: BackfillSettings,
}

#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub enabled: bool,
    pub start_from: Option<String>,
    pub sleep: std::time::Duration,
    pub chunk: Duration,
}

impl BackfillSettings {
    /// Parsed start point; `Ok(None)` when no start date is configured
    pub fn start(&self) -> Result<Option<DateTime<Utc>>> {
        match &self.start_from {
            Some(raw) => parse_start_from(raw).map(Some),
            None => Ok(None),
        }
    }
}

fn inherit<T: PartialEq + Default>(value: T, parent: T) -> T {
    if value == T::default() {
        parent
    } else {
        value
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Config {
    /// Raw override block for a token, matched case-insensitively
    pub fn token_config(&self, token: Token) -> TokenConfig {
        self.tokens
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(token.as_str()))
            .map(|(_, cfg)| cfg.clone())
            .unwrap_or_default()
    }

    /// `[tokens.*]` keys that do not name a supported token
    pub fn unknown_token_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tokens
            .keys()
            .filter(|name| name.parse::<Token>().is_err())
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn job_enabled(&self) -> bool {
        self.job.enabled.unwrap_or(true)
    }

    pub fn is_token_enabled(&self, token: Token) -> bool {
        self.token_config(token).enabled.unwrap_or(true)
    }

    /// Provider coin id for a token, refusing blank overrides
    pub fn coin_id(&self, token: Token) -> Result<String> {
        match self.token_config(token).coin_id {
            Some(id) => non_empty(&id).ok_or_else(|| {
                IngestError::UnsupportedToken(format!("{} has an empty provider coin id", token))
            }),
            None => Ok(token.coin_id().to_string()),
        }
    }

    pub fn token_settings(&self, token: Token) -> TokenSettings {
        let cfg = self.token_config(token);
        let enabled = self.is_token_enabled(token);

        let interval_secs = inherit(
            cfg.interval_seconds,
            inherit(self.job.interval_seconds, DEFAULT_INTERVAL_SECS),
        );
        let timeout_secs = inherit(
            cfg.timeout_seconds,
            inherit(self.api.timeout_seconds, DEFAULT_TIMEOUT_SECS),
        );
        let min_range_secs = inherit(cfg.min_time_range_seconds, DEFAULT_MIN_TIME_RANGE_SECS);
        let max_chunk_minutes = inherit(
            cfg.max_chunk_minutes,
            inherit(self.backfill.chunk_minutes, DEFAULT_MAX_CHUNK_MINUTES),
        );

        let backfill_chunk_minutes = inherit(
            cfg.backfill.chunk_minutes,
            inherit(self.backfill.chunk_minutes, DEFAULT_BACKFILL_CHUNK_MINUTES),
        )
        .min(max_chunk_minutes);
        let sleep_ms = inherit(
            cfg.backfill.sleep_ms,
            inherit(self.backfill.sleep_ms, DEFAULT_BACKFILL_SLEEP_MS),
        );
        let start_from =
            non_empty(&cfg.backfill.start_from).or_else(|| non_empty(&self.backfill.start_from));

        TokenSettings {
            token,
            enabled,
            interval: std::time::Duration::from_secs(interval_secs),
            timeout: std::time::Duration::from_secs(timeout_secs),
            min_time_range: Duration::seconds(min_range_secs as i64),
            max_chunk: Duration::minutes(max_chunk_minutes as i64),
            backfill: BackfillSettings {
                enabled: enabled && cfg.backfill.enabled.unwrap_or(self.backfill.enabled),
                start_from,
                sleep: std::time::Duration::from_millis(sleep_ms),
                chunk: Duration::minutes(backfill_chunk_minutes as i64),
            },
        }
    }
}
