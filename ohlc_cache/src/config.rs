//! Cache configuration: parsing, environment overrides, validation.
//!
//! ```toml
//! database_url = "ohlc_cache.db"
//! exchange_timezone = "America/New_York"
//!
//! [fetch]
//! max_attempts = 3
//! initial_backoff_ms = 200
//! max_backoff_ms = 5000
//! timeout_secs = 30
//!
//! [provider]
//! base_url = "https://quotes.example.com/v1"
//! api_key_env = "QUOTE_API_KEY"
//! requests_per_minute = 120
//! ```
//!
//! Entrypoints:
//! - Parse + validate from a TOML string: [`load_config_str`]
//! - Read, apply `OHLC_*` overrides, validate: [`load_config_path`]
//!
//! Overrides: `OHLC_DATABASE_URL` replaces `database_url`, `OHLC_EXCHANGE_TZ`
//! replaces `exchange_timezone`.

use std::{num::NonZeroU32, path::Path, time::Duration};

use quote_provider::providers::http::{HttpProviderSettings, params::BarsQueryOptions};
use serde::{Deserialize, Serialize};
use shared_utils::{config::ConfigError, env};

use crate::{calendar::TradingCalendar, fetcher::RetryPolicy, tz};

pub const DATABASE_URL_ENV: &str = "OHLC_DATABASE_URL";
pub const EXCHANGE_TZ_ENV: &str = "OHLC_EXCHANGE_TZ";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// SQLite database file path.
    pub database_url: String,
    /// IANA zone whose midnight starts each trading day.
    #[serde(default = "default_timezone")]
    pub exchange_timezone: String,
    #[serde(default)]
    pub fetch: FetchCfg,
    /// Required only by commands that talk to the upstream.
    #[serde(default)]
    pub provider: Option<ProviderCfg>,
}

/// Retry/timeout knobs for upstream calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct FetchCfg {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for FetchCfg {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            timeout_secs: 30,
        }
    }
}

/// HTTP provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderCfg {
    pub base_url: String,
    /// Name of the environment variable holding the API key (never the key itself).
    pub api_key_env: String,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    /// Page size forwarded as `limit`.
    #[serde(default)]
    pub page_limit: Option<u32>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_rpm() -> u32 {
    120
}

impl CacheConfig {
    /// Checks every field that deserialization alone cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::invalid("database_url", "must not be empty"));
        }
        tz::parse_timezone(&self.exchange_timezone)
            .map_err(|e| ConfigError::invalid("exchange_timezone", e.to_string()))?;

        let f = &self.fetch;
        if f.max_attempts == 0 {
            return Err(ConfigError::invalid("fetch.max_attempts", "must be at least 1"));
        }
        if f.max_backoff_ms < f.initial_backoff_ms {
            return Err(ConfigError::invalid(
                "fetch.max_backoff_ms",
                "must be >= fetch.initial_backoff_ms",
            ));
        }
        if f.timeout_secs == 0 {
            return Err(ConfigError::invalid("fetch.timeout_secs", "must be at least 1"));
        }

        if let Some(p) = &self.provider {
            if p.requests_per_minute == 0 {
                return Err(ConfigError::invalid(
                    "provider.requests_per_minute",
                    "must be at least 1",
                ));
            }
            if p.api_key_env.trim().is_empty() {
                return Err(ConfigError::invalid("provider.api_key_env", "must not be empty"));
            }
        }
        Ok(())
    }

    /// Applies overrides from `lookup` (the process environment in [`load_config_path`]).
    pub fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATABASE_URL_ENV) {
            self.database_url = url;
        }
        if let Some(zone) = lookup(EXCHANGE_TZ_ENV) {
            self.exchange_timezone = zone;
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(env::env_override);
    }

    pub fn calendar(&self) -> Result<TradingCalendar, ConfigError> {
        tz::parse_timezone(&self.exchange_timezone)
            .map(TradingCalendar::new)
            .map_err(|e| ConfigError::invalid("exchange_timezone", e.to_string()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.max_attempts,
            initial_backoff: Duration::from_millis(self.fetch.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.fetch.max_backoff_ms),
            timeout: Duration::from_secs(self.fetch.timeout_secs),
        }
    }

    /// Settings for [`quote_provider::providers::http::HttpQuoteProvider`].
    pub fn http_settings(&self) -> Result<HttpProviderSettings, ConfigError> {
        let p = self
            .provider
            .as_ref()
            .ok_or_else(|| ConfigError::invalid("provider", "section is required to fetch"))?;
        let requests_per_minute = NonZeroU32::new(p.requests_per_minute).ok_or_else(|| {
            ConfigError::invalid("provider.requests_per_minute", "must be at least 1")
        })?;
        Ok(HttpProviderSettings {
            base_url: p.base_url.clone(),
            api_key_env: p.api_key_env.clone(),
            requests_per_minute,
            options: BarsQueryOptions {
                limit: p.page_limit,
                sort: None,
            },
        })
    }
}

/// Parse and validate a config from TOML text. No environment overrides.
pub fn load_config_str(s: &str) -> Result<CacheConfig, ConfigError> {
    let cfg: CacheConfig = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Read a config file, apply `OHLC_*` environment overrides, then validate.
pub fn load_config_path(path: impl AsRef<Path>) -> Result<CacheConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut cfg: CacheConfig =
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}
