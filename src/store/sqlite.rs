// src/store/sqlite.rs
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{NewSentiment, Observation, SentimentRecord, Store};
use crate::error::StoreError;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// SQLite-backed store. Cheap to clone (the pool is reference counted).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and apply the schema. `sqlite::memory:` gets a single pinned connection,
    /// since every new in-memory connection would otherwise see an empty database.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");
        if !in_memory {
            ensure_parent_dir(database_url);
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool_opts = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
        };

        let pool = pool_opts.connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;

        info!(target: "store", in_memory, "sqlite store ready");
        Ok(store)
    }

    /// Wrap an existing pool (schema must already be applied).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        // sqlx executes one statement per query
        for statement in SCHEMA.split(';') {
            let stmt = statement.trim();
            if stmt.is_empty() || stmt.lines().all(|l| l.trim_start().starts_with("--")) {
                continue;
            }
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn ensure_parent_dir(database_url: &str) {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let path = path.split('?').next().unwrap_or_default();
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent); // best-effort
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn latest_observations(
        &self,
        coin: &str,
        limit: u32,
    ) -> Result<Vec<Observation>, StoreError> {
        let rows = sqlx::query_as::<_, Observation>(
            "SELECT coin, value, created_at FROM exchange_rates
             WHERE coin = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(coin)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn observations_since(
        &self,
        coin: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Observation>, StoreError> {
        let rows = sqlx::query_as::<_, Observation>(
            "SELECT coin, value, created_at FROM exchange_rates
             WHERE coin = ? AND created_at > ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(coin)
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_observation(&self, obs: &Observation) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO exchange_rates (coin, value, created_at) VALUES (?, ?, ?)")
            .bind(&obs.coin)
            .bind(obs.value)
            .bind(obs.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sentiment_sum_since(
        &self,
        coin: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(sentiment), 0) FROM sentiments
             WHERE coin = ? AND created_at >= ?",
        )
        .bind(coin)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn recent_non_neutral(&self, limit: u32) -> Result<Vec<SentimentRecord>, StoreError> {
        let rows = sqlx::query_as::<_, SentimentRecord>(
            "SELECT id, created_at, coin, sentiment, source FROM sentiments
             WHERE sentiment <> 0 ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_sentiment(&self, rec: &NewSentiment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sentiments (created_at, coin, sentiment, source) VALUES (?, ?, ?, ?)",
        )
        .bind(rec.created_at)
        .bind(&rec.coin)
        .bind(i64::from(rec.sentiment.value()))
        .bind(&rec.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_seen(&self, url: &str) -> Result<bool, StoreError> {
        let hit: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rss_posts WHERE url = ?)")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(hit != 0)
    }

    async fn mark_seen(&self, url: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO rss_posts (url, created_at) VALUES (?, ?)")
            .bind(url)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
