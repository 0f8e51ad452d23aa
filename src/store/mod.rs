// src/store/mod.rs
//! Persistent store: entities and the query surface the core relies on.
//!
//! The store is the sole source of truth. Components hold an `Arc<dyn Store>`
//! handed to them at construction and re-read it for every decision.

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OracleError, StoreError};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One timestamped market price sample for a coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Observation {
    pub coin: String,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}

/// Scored judgment of one article's effect on one coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i64")]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
}

impl Sentiment {
    pub fn value(self) -> i8 {
        match self {
            Sentiment::Negative => -1,
            Sentiment::Neutral => 0,
            Sentiment::Positive => 1,
        }
    }
}

impl From<Sentiment> for i8 {
    fn from(s: Sentiment) -> Self {
        s.value()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sentiment out of range: {0}")]
pub struct SentimentRangeError(pub i64);

impl TryFrom<i64> for Sentiment {
    type Error = SentimentRangeError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(Sentiment::Negative),
            0 => Ok(Sentiment::Neutral),
            1 => Ok(Sentiment::Positive),
            other => Err(SentimentRangeError(other)),
        }
    }
}

/// Strict parse of a text-model answer. Only `-1`, `0`, `1` (or `+1`) are accepted;
/// anything else is a malformed response, never a silent neutral.
impl FromStr for Sentiment {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().trim_end_matches('.');
        match t {
            "-1" => Ok(Sentiment::Negative),
            "0" => Ok(Sentiment::Neutral),
            "1" | "+1" => Ok(Sentiment::Positive),
            _ => Err(OracleError::malformed("sentiment", s)),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Negative => f.write_str("-1"),
            Sentiment::Neutral => f.write_str("0"),
            Sentiment::Positive => f.write_str("+1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SentimentRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub coin: String,
    #[sqlx(try_from = "i64")]
    pub sentiment: Sentiment,
    pub source: String,
}

/// Insert form of `SentimentRecord` (the id is assigned by the store).
#[derive(Debug, Clone, PartialEq)]
pub struct NewSentiment {
    pub created_at: DateTime<Utc>,
    pub coin: String,
    pub sentiment: Sentiment,
    pub source: String,
}

/// Dedup ledger row: presence means the URL must not be processed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SeenArticle {
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Query surface over `exchange_rates`, `sentiments` and `rss_posts`.
///
/// Each method is a single statement; nothing spans more than one read or write.
#[async_trait]
pub trait Store: Send + Sync {
    /// Most recent observations for `coin`, newest first, at most `limit`.
    async fn latest_observations(
        &self,
        coin: &str,
        limit: u32,
    ) -> Result<Vec<Observation>, StoreError>;

    /// Observations with `created_at > since`, newest first, at most `limit`.
    async fn observations_since(
        &self,
        coin: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Observation>, StoreError>;

    async fn insert_observation(&self, obs: &Observation) -> Result<(), StoreError>;

    /// Sum of sentiment for `coin` with `created_at >= since` (0 when empty).
    async fn sentiment_sum_since(
        &self,
        coin: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Most recent non-neutral records across all coins, newest first.
    async fn recent_non_neutral(&self, limit: u32) -> Result<Vec<SentimentRecord>, StoreError>;

    async fn insert_sentiment(&self, rec: &NewSentiment) -> Result<(), StoreError>;

    async fn is_seen(&self, url: &str) -> Result<bool, StoreError>;

    /// Idempotent: marking an already-seen URL is not an error.
    async fn mark_seen(&self, url: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}
