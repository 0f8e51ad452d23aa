// src/config/feeds.rs
//! Tracked coins and news feeds.
//!
//! Order matters: coins are refreshed and feeds processed in the listed order.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_PATH: &str = "FEEDS_CONFIG_PATH";

const DEFAULT_COINS: &[&str] = &[
    "BTC", "ETH", "LTC", "DOGE", "SHIB", "LINK", "XMR", "SOL", "USDT", "XTZ",
];
const DEFAULT_FORECAST_COINS: &[&str] = &["BTC", "ETH", "LTC"];
const DEFAULT_SENTIMENT_COIN: &str = "BTC";
const DEFAULT_FEEDS: &[&str] = &[
    "https://www.coindesk.com/arc/outboundfeeds/rss/",
    "https://cointelegraph.com/rss",
    "https://cryptopotato.com/feed/",
    "https://cryptoslate.com/feed/",
    "https://cryptonews.com/news/feed/",
    "https://cryptobriefing.com/feed/",
    "https://www.cryptocurrencynews.com/feed/",
    "https://cryptoslate.com/feed/",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "default_coins")]
    pub coins: Vec<String>,
    #[serde(default = "default_forecast_coins")]
    pub forecast_coins: Vec<String>,
    #[serde(default = "default_feeds")]
    pub feeds: Vec<String>,
    #[serde(default = "default_sentiment_coin")]
    pub sentiment_coin: String,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_coins() -> Vec<String> {
    owned(DEFAULT_COINS)
}
fn default_forecast_coins() -> Vec<String> {
    owned(DEFAULT_FORECAST_COINS)
}
fn default_feeds() -> Vec<String> {
    owned(DEFAULT_FEEDS)
}
fn default_sentiment_coin() -> String {
    DEFAULT_SENTIMENT_COIN.to_string()
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            coins: default_coins(),
            forecast_coins: default_forecast_coins(),
            feeds: default_feeds(),
            sentiment_coin: default_sentiment_coin(),
        }
        .cleaned()
    }
}

impl FeedsConfig {
    /// Trim entries, drop empties and later duplicates.
    pub fn cleaned(mut self) -> Self {
        self.coins = clean_list(self.coins);
        self.forecast_coins = clean_list(self.forecast_coins);
        self.feeds = clean_list(self.feeds);
        let coin = self.sentiment_coin.trim();
        self.sentiment_coin = if coin.is_empty() {
            default_sentiment_coin()
        } else {
            coin.to_string()
        };
        self
    }
}

/// Load from an explicit path. Supports TOML or JSON.
pub fn load_feeds_from(path: &Path) -> Result<FeedsConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feeds config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_feeds(&content, ext.as_str())
}

/// Load using env var + fallbacks:
/// 1) $FEEDS_CONFIG_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) built-in defaults
pub fn load_feeds_default() -> Result<FeedsConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_feeds_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_feeds_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_feeds_from(&json_p);
    }
    Ok(FeedsConfig::default())
}

fn parse_feeds(s: &str, hint_ext: &str) -> Result<FeedsConfig> {
    let cfg: FeedsConfig = match hint_ext {
        "toml" => toml::from_str(s).context("parsing feeds toml")?,
        "json" => serde_json::from_str(s).context("parsing feeds json")?,
        _ => match serde_json::from_str(s) {
            Ok(c) => c,
            Err(_) => toml::from_str(s).map_err(|_| anyhow!("unsupported feeds config format"))?,
        },
    };
    Ok(cfg.cleaned())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && seen.insert(t.to_string()) {
            out.push(t.to_string());
        }
    }
    out
}
