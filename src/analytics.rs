// src/analytics.rs
//! Derived read-only views over persisted observations and sentiment.
//!
//! "No signal" is `None`, never a zero that could be confused with a real
//! zero change.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::error;

use crate::clock::Clock;
use crate::error::{validate_symbol, AnalyticsError, InputError};
use crate::store::{Observation, Store};

pub const DEFAULT_CHATTER_LIMIT: u32 = 10;
pub const DEFAULT_HISTORY_LIMIT: u32 = 500;

pub struct Analytics {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    history_limit: u32,
}

impl Analytics {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Cap on samples returned by `historical_window`.
    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Percent change between the two most recent observations.
    ///
    /// `None` when fewer than two observations exist or the previous value is zero.
    pub async fn percent_change_24h(&self, symbol: &str) -> Result<Option<f64>, AnalyticsError> {
        let coin = validate_symbol(symbol)?;
        let rows = self
            .store
            .latest_observations(coin, 2)
            .await
            .inspect_err(|e| error!(target: "analytics", %coin, error = %e, "percent change query failed"))?;
        Ok(percent_change(&rows))
    }

    /// Sum of sentiment for `symbol` over the trailing `window_hours`.
    ///
    /// The window edge is inclusive: a record created exactly `window_hours` ago counts.
    pub async fn sentiment_score(
        &self,
        symbol: &str,
        window_hours: i64,
    ) -> Result<i64, AnalyticsError> {
        let coin = validate_symbol(symbol)?;
        if window_hours <= 0 {
            return Err(InputError::NonPositiveWindow(window_hours).into());
        }
        let since = self.clock.now() - Duration::hours(window_hours);
        let sum = self
            .store
            .sentiment_sum_since(coin, since)
            .await
            .inspect_err(|e| error!(target: "analytics", %coin, error = %e, "sentiment query failed"))?;
        Ok(sum)
    }

    /// Observations strictly after `since`, newest first, capped at the history limit.
    pub async fn historical_window(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Observation>, AnalyticsError> {
        let coin = validate_symbol(symbol)?;
        let rows = self
            .store
            .observations_since(coin, since, self.history_limit)
            .await
            .inspect_err(|e| error!(target: "analytics", %coin, error = %e, "history query failed"))?;
        Ok(rows)
    }

    /// Like `historical_window`, taking a unix timestamp.
    pub async fn historical_window_unix(
        &self,
        symbol: &str,
        since_unix: i64,
    ) -> Result<Vec<Observation>, AnalyticsError> {
        let since = DateTime::<Utc>::from_timestamp(since_unix, 0)
            .ok_or(InputError::TimestampOutOfRange(since_unix))?;
        self.historical_window(symbol, since).await
    }

    /// Source URLs of the most recent non-neutral sentiment records, newest first.
    pub async fn recent_non_neutral_sources(&self, limit: u32) -> Result<Vec<String>, AnalyticsError> {
        if limit == 0 {
            return Err(InputError::NonPositiveLimit.into());
        }
        let rows = self
            .store
            .recent_non_neutral(limit)
            .await
            .inspect_err(|e| error!(target: "analytics", error = %e, "chatter query failed"))?;
        Ok(rows.into_iter().map(|r| r.source).collect())
    }
}

/// `(latest - previous) / previous * 100` over newest-first rows.
pub fn percent_change(newest_first: &[Observation]) -> Option<f64> {
    match newest_first {
        [latest, previous, ..] if previous.value != 0.0 => {
            let change = (latest.value - previous.value) / previous.value * 100.0;
            change.is_finite().then_some(change)
        }
        _ => None,
    }
}
