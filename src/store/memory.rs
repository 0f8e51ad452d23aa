// src/store/memory.rs
//! In-process `Store` with switchable failures. Used by tests and local dry runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{NewSentiment, Observation, SeenArticle, Sentiment, SentimentRecord, Store};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Tables {
    exchange_rates: Vec<Observation>,
    sentiments: Vec<SentimentRecord>,
    rss_posts: Vec<SeenArticle>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read return `StoreError::Unavailable`.
    pub fn set_fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Make every write return `StoreError::Unavailable`.
    pub fn set_fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Seed an observation directly, bypassing failure switches.
    pub fn seed_observation(&self, coin: &str, value: f64, at: DateTime<Utc>) {
        self.lock().exchange_rates.push(Observation {
            coin: coin.to_string(),
            value,
            created_at: at,
        });
    }

    /// Seed a sentiment record directly, bypassing failure switches.
    pub fn seed_sentiment(&self, coin: &str, sentiment: Sentiment, source: &str, at: DateTime<Utc>) {
        let mut t = self.lock();
        t.next_id += 1;
        let id = t.next_id;
        t.sentiments.push(SentimentRecord {
            id,
            created_at: at,
            coin: coin.to_string(),
            sentiment,
            source: source.to_string(),
        });
    }

    pub fn observations(&self, coin: &str) -> Vec<Observation> {
        self.lock()
            .exchange_rates
            .iter()
            .filter(|o| o.coin == coin)
            .cloned()
            .collect()
    }

    pub fn sentiments(&self) -> Vec<SentimentRecord> {
        self.lock().sentiments.clone()
    }

    pub fn seen_urls(&self) -> Vec<String> {
        self.lock().rss_posts.iter().map(|s| s.url.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory store mutex poisoned")
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

/// Newest first; insertion order breaks ties so the later insert wins.
fn newest_first(mut v: Vec<Observation>) -> Vec<Observation> {
    v.reverse();
    v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    v
}

#[async_trait]
impl Store for MemoryStore {
    async fn latest_observations(
        &self,
        coin: &str,
        limit: u32,
    ) -> Result<Vec<Observation>, StoreError> {
        self.check_read()?;
        let mut v = newest_first(self.observations(coin));
        v.truncate(limit as usize);
        Ok(v)
    }

    async fn observations_since(
        &self,
        coin: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Observation>, StoreError> {
        self.check_read()?;
        let hits = self
            .observations(coin)
            .into_iter()
            .filter(|o| o.created_at > since)
            .collect();
        let mut v = newest_first(hits);
        v.truncate(limit as usize);
        Ok(v)
    }

    async fn insert_observation(&self, obs: &Observation) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock().exchange_rates.push(obs.clone());
        Ok(())
    }

    async fn sentiment_sum_since(
        &self,
        coin: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.check_read()?;
        Ok(self
            .lock()
            .sentiments
            .iter()
            .filter(|s| s.coin == coin && s.created_at >= since)
            .map(|s| i64::from(s.sentiment.value()))
            .sum())
    }

    async fn recent_non_neutral(&self, limit: u32) -> Result<Vec<SentimentRecord>, StoreError> {
        self.check_read()?;
        let mut v: Vec<SentimentRecord> = self
            .lock()
            .sentiments
            .iter()
            .filter(|s| s.sentiment != Sentiment::Neutral)
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        v.truncate(limit as usize);
        Ok(v)
    }

    async fn insert_sentiment(&self, rec: &NewSentiment) -> Result<(), StoreError> {
        self.check_write()?;
        self.seed_sentiment(&rec.coin, rec.sentiment, &rec.source, rec.created_at);
        Ok(())
    }

    async fn is_seen(&self, url: &str) -> Result<bool, StoreError> {
        self.check_read()?;
        Ok(self.lock().rss_posts.iter().any(|s| s.url == url))
    }

    async fn mark_seen(&self, url: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_write()?;
        let mut t = self.lock();
        if !t.rss_posts.iter().any(|s| s.url == url) {
            t.rss_posts.push(SeenArticle {
                url: url.to_string(),
                created_at: at,
            });
        }
        Ok(())
    }
}
