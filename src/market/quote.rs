// src/market/quote.rs
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::OracleError;

/// Latest price for one symbol plus the metadata the upstream reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub name: Option<String>,
    pub price_usd: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// External quote source. Failure is always explicit, never a zero price.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn latest(&self, symbol: &str) -> Result<Quote, OracleError>;
    fn name(&self) -> &'static str;
}

const CMC_QUOTES_URL: &str = "https://pro-api.coinmarketcap.com/v2/cryptocurrency/quotes/latest";

/// CoinMarketCap `quotes/latest` client. Requires `COINMARKETCAP_API_KEY`.
pub struct CoinMarketCapClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl CoinMarketCapClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crypto-bunker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: CMC_QUOTES_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct CmcResponse {
    status: CmcStatus,
    #[serde(default)]
    data: HashMap<String, Vec<CmcCoin>>,
}

#[derive(Debug, Deserialize)]
struct CmcStatus {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CmcCoin {
    name: Option<String>,
    symbol: String,
    quote: HashMap<String, CmcQuote>,
}

#[derive(Debug, Deserialize)]
struct CmcQuote {
    price: Option<f64>,
    last_updated: Option<DateTime<Utc>>,
}

/// Pull the first USD quote for `symbol` out of a decoded response.
fn extract_quote(symbol: &str, body: CmcResponse) -> Result<Quote, OracleError> {
    if body.status.error_code != 0 {
        return Err(OracleError::Api {
            status: 200,
            message: body
                .status
                .error_message
                .unwrap_or_else(|| format!("error_code {}", body.status.error_code)),
        });
    }

    let coin = body
        .data
        .get(symbol)
        .and_then(|v| v.first())
        .ok_or(OracleError::Empty("quote"))?;
    let usd = coin.quote.get("USD").ok_or(OracleError::Empty("quote"))?;

    match usd.price {
        Some(p) if p.is_finite() && p > 0.0 => Ok(Quote {
            symbol: coin.symbol.clone(),
            name: coin.name.clone(),
            price_usd: p,
            last_updated: usd.last_updated,
        }),
        other => Err(OracleError::malformed("quote", format!("{other:?}"))),
    }
}

#[async_trait]
impl QuoteSource for CoinMarketCapClient {
    async fn latest(&self, symbol: &str) -> Result<Quote, OracleError> {
        if self.api_key.is_empty() {
            return Err(OracleError::Config("COINMARKETCAP_API_KEY not set".into()));
        }

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[("symbol", symbol)])
            .header("Accept", "application/json")
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let raw = resp.text().await?;
        let body: CmcResponse =
            serde_json::from_str(&raw).map_err(|_| OracleError::malformed("quote", raw))?;
        extract_quote(symbol, body)
    }

    fn name(&self) -> &'static str {
        "coinmarketcap"
    }
}
