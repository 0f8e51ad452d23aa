// src/oracle/mod.rs
//! External oracles: paraphrasing, headline sentiment, price forecasts and images.
//!
//! Each oracle is a `Request -> Result` seam so pipelines can be exercised with stubs.
//! Text answers are parsed strictly; a reply that is not the expected shape is an
//! `OracleError::Malformed`, never a default value.

pub mod llm;
pub mod unsplash;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::OracleError;
use crate::store::Sentiment;

pub use llm::{GeminiModel, LlmOracles, TextModel};
pub use unsplash::UnsplashClient;

/// Upper bound on article text sent for paraphrasing, in characters.
pub const MAX_SOURCE_CHARS: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParaphraseRequest {
    pub text: String,
    pub headline: String,
    pub attribution: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paraphrased {
    pub body: String,
    pub headline: String,
}

#[async_trait]
pub trait Paraphraser: Send + Sync {
    async fn paraphrase(&self, req: &ParaphraseRequest) -> Result<Paraphrased, OracleError>;
}

#[async_trait]
pub trait SentimentOracle: Send + Sync {
    /// Effect of `headline` on the market value of `coin`.
    async fn score(&self, headline: &str, coin: &str) -> Result<Sentiment, OracleError>;
}

/// Forecast horizons used by the weekly report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Horizon {
    #[serde(rename = "1 week")]
    OneWeek,
    #[serde(rename = "1 month")]
    OneMonth,
    #[serde(rename = "3 months")]
    ThreeMonths,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::OneWeek, Horizon::OneMonth, Horizon::ThreeMonths];

    pub fn label(self) -> &'static str {
        match self {
            Horizon::OneWeek => "1 week",
            Horizon::OneMonth => "1 month",
            Horizon::ThreeMonths => "3 months",
        }
    }
}

#[async_trait]
pub trait ForecastOracle: Send + Sync {
    /// USD estimate for `coin` at `horizon`, given recent samples (newest first).
    async fn forecast(
        &self,
        coin: &str,
        horizon: Horizon,
        samples: &[f64],
    ) -> Result<f64, OracleError>;
}

#[async_trait]
pub trait ImageOracle: Send + Sync {
    /// URL of an illustrative image for `query`.
    async fn image_url(&self, query: &str) -> Result<String, OracleError>;
}

/// First `max` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse a single positive USD amount out of a text-model reply.
///
/// Tolerates a leading `$`, a trailing `USD` and thousands separators; anything
/// else (words, ranges, several numbers) is malformed.
pub fn parse_price(raw: &str) -> Result<f64, OracleError> {
    let t = raw.trim();
    let t = t.strip_prefix('$').unwrap_or(t).trim();
    let t = t
        .strip_suffix("USD")
        .or_else(|| t.strip_suffix("usd"))
        .unwrap_or(t)
        .trim();
    let t = t.strip_suffix('.').unwrap_or(t);
    let cleaned: String = t.chars().filter(|c| *c != ',').collect();

    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(OracleError::malformed("forecast", raw)),
    }
}
