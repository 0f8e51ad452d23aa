// src/config/mod.rs
//! Process configuration from the environment (`.env` is loaded by `main`).
//!
//! Missing credentials are not an error here: the affected client is still
//! built and fails each call with `OracleError::Config`.

pub mod feeds;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub use feeds::{load_feeds_default, load_feeds_from, FeedsConfig};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/bunker.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";
pub const DEFAULT_PAGE_CACHE_DIR: &str = "cache/pages";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub coinmarketcap_api_key: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub unsplash_access_key: String,
    pub ghost_url: String,
    pub ghost_admin_key: Option<String>,
    pub market_interval: Duration,
    pub forecast_interval: Duration,
    pub feed_interval: Duration,
    pub call_timeout: Duration,
    /// `None` disables the on-disk page cache.
    pub page_cache_dir: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn set(s: &str) -> &'static str {
            if s.is_empty() {
                "<unset>"
            } else {
                "<set>"
            }
        }
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field("bind_addr", &self.bind_addr)
            .field("coinmarketcap_api_key", &set(&self.coinmarketcap_api_key))
            .field("gemini_api_key", &set(&self.gemini_api_key))
            .field("gemini_model", &self.gemini_model)
            .field("unsplash_access_key", &set(&self.unsplash_access_key))
            .field("ghost_url", &self.ghost_url)
            .field("ghost_admin_key", &set(self.ghost_admin_key.as_deref().unwrap_or("")))
            .field("market_interval", &self.market_interval)
            .field("forecast_interval", &self.forecast_interval)
            .field("feed_interval", &self.feed_interval)
            .field("call_timeout", &self.call_timeout)
            .field("page_cache_dir", &self.page_cache_dir)
            .field("log_format", &self.log_format)
            .finish()
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn secs_or(key: &str, default: u64) -> Result<Duration> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => {
            let n: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("{key} must be a whole number of seconds, got {v:?}"))?;
            Ok(Duration::from_secs(n.max(1)))
        }
        _ => Ok(Duration::from_secs(default)),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_raw = var_or("BIND_ADDR", DEFAULT_BIND_ADDR);
        let bind_addr = bind_raw
            .parse()
            .with_context(|| format!("BIND_ADDR is not a socket address: {bind_raw:?}"))?;

        let page_cache_dir = match env::var("PAGE_CACHE_DIR") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(PathBuf::from(v.trim())),
            Err(_) => Some(PathBuf::from(DEFAULT_PAGE_CACHE_DIR)),
        };

        let log_format = if var_or("LOG_FORMAT", "compact").eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };

        Ok(Self {
            database_url: var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            bind_addr,
            coinmarketcap_api_key: var_or("COINMARKETCAP_API_KEY", ""),
            gemini_api_key: var_or("GEMINI_API_KEY", ""),
            gemini_model: var_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            unsplash_access_key: var_or("UNSPLASH_ACCESS_KEY", ""),
            ghost_url: var_or("GHOST_URL", ""),
            ghost_admin_key: Some(var_or("GHOST_ADMIN_KEY", "")).filter(|k| !k.is_empty()),
            market_interval: secs_or("MARKET_INTERVAL_SECS", 900)?,
            forecast_interval: secs_or("FORECAST_INTERVAL_SECS", 86_400)?,
            feed_interval: secs_or("FEED_INTERVAL_SECS", 60)?,
            call_timeout: secs_or("CALL_TIMEOUT_SECS", 30)?,
            page_cache_dir,
            log_format,
        })
    }
}
