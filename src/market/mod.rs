// src/market/mod.rs
//! Staleness-driven value cache over persisted observations.
//!
//! `get_value` trusts the newest stored observation while it is younger than the
//! freshness window. Older (or missing) observations trigger a quote refresh; if the
//! quote source is down the stale value is served instead and nothing is written.

pub mod quote;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{validate_symbol, ValueError};
use crate::runtime::{bounded, Pacer};
use crate::store::{Observation, Store};

pub use quote::{CoinMarketCapClient, Quote, QuoteSource};

pub const FRESHNESS_WINDOW_HOURS: i64 = 4;
pub const MARKET_PACING: Duration = Duration::from_secs(10);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Stored observation inside the freshness window; no external call made.
    Fresh,
    /// Fetched from the quote source and persisted.
    Refreshed,
    /// Quote source failed; the last stored value is served as-is.
    StaleFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedValue {
    pub coin: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    pub provenance: Provenance,
}

pub struct ValueCache {
    store: Arc<dyn Store>,
    quotes: Arc<dyn QuoteSource>,
    clock: Arc<dyn Clock>,
    freshness: chrono::Duration,
    call_timeout: Duration,
}

impl ValueCache {
    pub fn new(store: Arc<dyn Store>, quotes: Arc<dyn QuoteSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            quotes,
            clock,
            freshness: chrono::Duration::hours(FRESHNESS_WINDOW_HOURS),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn freshness(&self) -> chrono::Duration {
        self.freshness
    }

    /// Current value of `symbol`, refreshing from the quote source when stale.
    pub async fn get_value(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<CachedValue, ValueError> {
        let coin = validate_symbol(symbol)?;
        let now = self.clock.now();

        let latest = match self.store.latest_observations(coin, 1).await {
            Ok(mut rows) => rows.pop(),
            Err(e) => {
                error!(target: "market", %coin, error = %e, "reading latest observation failed");
                return Err(ValueError::Store(e));
            }
        };

        if let Some(obs) = &latest {
            if now - obs.created_at <= self.freshness {
                counter!("market_cache_hits_total").increment(1);
                debug!(target: "market", %coin, value = obs.value, "value loaded from store");
                return Ok(CachedValue {
                    coin: coin.to_string(),
                    value: obs.value,
                    observed_at: obs.created_at,
                    provenance: Provenance::Fresh,
                });
            }
        }

        info!(target: "market", %coin, cached = latest.is_some(), "value stale, asking quote source");
        let fetched = bounded(cancel, self.call_timeout, self.quotes.latest(coin)).await;

        match fetched {
            Ok(q) => {
                counter!("market_refresh_total").increment(1);
                let obs = Observation {
                    coin: coin.to_string(),
                    value: q.price_usd,
                    created_at: now,
                };
                if let Err(e) = self.store.insert_observation(&obs).await {
                    warn!(target: "market", %coin, error = %e, "persisting observation failed");
                }
                Ok(CachedValue {
                    coin: obs.coin,
                    value: obs.value,
                    observed_at: now,
                    provenance: Provenance::Refreshed,
                })
            }
            Err(e) => {
                counter!("market_refresh_failures_total").increment(1);
                match latest {
                    Some(obs) => {
                        counter!("market_stale_fallback_total").increment(1);
                        warn!(
                            target: "market",
                            %coin,
                            source = self.quotes.name(),
                            error = %e,
                            age_mins = (now - obs.created_at).num_minutes(),
                            "quote source failed, serving stale value"
                        );
                        Ok(CachedValue {
                            coin: obs.coin,
                            value: obs.value,
                            observed_at: obs.created_at,
                            provenance: Provenance::StaleFallback,
                        })
                    }
                    None => {
                        warn!(target: "market", %coin, error = %e, "no stored value and quote source failed");
                        Err(ValueError::NoObservation {
                            coin: coin.to_string(),
                            source: e,
                        })
                    }
                }
            }
        }
    }
}

/// Outcome counts for one pass over the tracked coins.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub fresh: usize,
    pub refreshed: usize,
    pub stale: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Walk `coins` in order, one `get_value` each, spaced by `pacing`.
pub async fn refresh_all(
    cache: &ValueCache,
    coins: &[String],
    pacing: Duration,
    cancel: &CancellationToken,
) -> RefreshSummary {
    let mut summary = RefreshSummary::default();
    let mut pacer = Pacer::new(pacing);

    for coin in coins {
        if pacer.ready(cancel).await.is_err() {
            summary.cancelled = true;
            break;
        }
        match cache.get_value(coin, cancel).await {
            Ok(v) => match v.provenance {
                Provenance::Fresh => summary.fresh += 1,
                Provenance::Refreshed => summary.refreshed += 1,
                Provenance::StaleFallback => summary.stale += 1,
            },
            Err(e) => {
                summary.failed += 1;
                warn!(target: "market", %coin, error = %e, "refresh failed");
            }
        }
    }

    info!(
        target: "market",
        fresh = summary.fresh,
        refreshed = summary.refreshed,
        stale = summary.stale,
        failed = summary.failed,
        "market refresh pass finished"
    );
    summary
}
