// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// One entry of a news feed, in the order the feed delivered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A fetched feed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedBatch {
    /// Publication name used for attribution (channel title, else host).
    pub source_name: String,
    pub items: Vec<FeedItem>,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<FeedBatch, OracleError>;
    fn name(&self) -> &str;
}
