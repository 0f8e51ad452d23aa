// src/forecast.rs
//! Weekly per-coin market report: current price, 24h change, three horizon
//! forecasts and the articles currently driving sentiment.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};
use html_escape::{encode_double_quoted_attribute, encode_text};
use metrics::counter;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analytics::{Analytics, DEFAULT_CHATTER_LIMIT};
use crate::clock::Clock;
use crate::error::ForecastError;
use crate::ingest::IMAGE_QUERY;
use crate::market::{CachedValue, ValueCache, DEFAULT_CALL_TIMEOUT};
use crate::oracle::{ForecastOracle, Horizon, ImageOracle};
use crate::publish::{PostRequest, Publisher};
use crate::runtime::bounded;

pub const HISTORY_LOOKBACK_HOURS: i64 = 1000;
pub const FORECAST_WEEKDAY: Weekday = Weekday::Sun;

pub const DISCLAIMER: &str = "This is not financial advice. This is for entertainment purposes \
only. Do your own research before making any investment. The author is not responsible for any \
losses incurred. The information on this page is simply opinion based on publicly available data.";

/// Everything a weekly report shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketForecast {
    pub coin: String,
    pub price: CachedValue,
    pub change_24h: Option<f64>,
    pub forecasts: Vec<(Horizon, f64)>,
    pub chatter: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

pub fn title(coin: &str) -> String {
    format!("Weekly {coin}")
}

/// Reports go out on Sundays (UTC).
pub fn is_forecast_day(now: DateTime<Utc>) -> bool {
    now.weekday() == FORECAST_WEEKDAY
}

fn capitalize(label: &str) -> String {
    label
        .split(' ')
        .map(|w| {
            let mut cs = w.chars();
            match cs.next() {
                Some(c) => c.to_uppercase().chain(cs).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// HTML body of the report.
pub fn render_html(f: &MarketForecast) -> String {
    let mut out = String::with_capacity(1024);
    let change = f
        .change_24h
        .map(|c| format!("{c:+.2}"))
        .unwrap_or_else(|| "n/a".to_string());

    let _ = writeln!(out, "<p>{}</p>", encode_text(DISCLAIMER));
    out.push_str("<table border=\"1\">\n");
    out.push_str("<tr><th>Currency</th><th>Price (USD)</th><th>Change 24h (%)</th></tr>\n");
    let _ = writeln!(
        out,
        "<tr><td>{}</td><td>{:.2}</td><td>{}</td></tr>",
        encode_text(&f.coin),
        f.price.value,
        change
    );
    out.push_str("</table>\n");

    out.push_str("<h2>Forecast</h2>\n<ul>\n");
    for (h, v) in &f.forecasts {
        let _ = writeln!(out, "<li>{}: {:.2}</li>", capitalize(h.label()), v);
    }
    out.push_str("</ul>\n");

    out.push_str("<h2>Chatter</h2>\n<ul>\n");
    for url in &f.chatter {
        let _ = writeln!(
            out,
            "<li><a href=\"{}\">{}</a></li>",
            encode_double_quoted_attribute(url),
            encode_text(url)
        );
    }
    out.push_str("</ul>\n");
    out
}

pub struct ForecastAssembler {
    cache: Arc<ValueCache>,
    analytics: Arc<Analytics>,
    oracle: Arc<dyn ForecastOracle>,
    images: Arc<dyn ImageOracle>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
}

impl ForecastAssembler {
    pub fn new(
        cache: Arc<ValueCache>,
        analytics: Arc<Analytics>,
        oracle: Arc<dyn ForecastOracle>,
        images: Arc<dyn ImageOracle>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            analytics,
            oracle,
            images,
            publisher,
            clock,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Gather the report data for `coin`. Any failing horizon fails the report.
    pub async fn assemble(
        &self,
        coin: &str,
        cancel: &CancellationToken,
    ) -> Result<MarketForecast, ForecastError> {
        let price = self.cache.get_value(coin, cancel).await?;
        let coin = price.coin.clone();
        let now = self.clock.now();

        let since = now - chrono::Duration::hours(HISTORY_LOOKBACK_HOURS);
        let samples: Vec<f64> = self
            .analytics
            .historical_window(&coin, since)
            .await?
            .into_iter()
            .map(|o| o.value)
            .collect();

        let mut forecasts = Vec::with_capacity(Horizon::ALL.len());
        for h in Horizon::ALL {
            let v = bounded(cancel, self.call_timeout, self.oracle.forecast(&coin, h, &samples))
                .await
                .map_err(|source| ForecastError::Horizon {
                    horizon: h.label(),
                    source,
                })?;
            forecasts.push((h, v));
        }

        let change_24h = self.analytics.percent_change_24h(&coin).await?;
        let chatter = self
            .analytics
            .recent_non_neutral_sources(DEFAULT_CHATTER_LIMIT)
            .await?;

        Ok(MarketForecast {
            coin,
            price,
            change_24h,
            forecasts,
            chatter,
            generated_at: now,
        })
    }

    /// Assemble, render and publish the weekly report for `coin` as a featured post.
    pub async fn publish_weekly(
        &self,
        coin: &str,
        cancel: &CancellationToken,
    ) -> Result<MarketForecast, ForecastError> {
        let report = match self.assemble(coin, cancel).await {
            Ok(r) => r,
            Err(e) => {
                counter!("forecast_failures_total").increment(1);
                warn!(target: "forecast", %coin, error = %e, "forecast assembly failed");
                return Err(e);
            }
        };

        let image = match bounded(cancel, self.call_timeout, self.images.image_url(IMAGE_QUERY)).await {
            Ok(u) => Some(u),
            Err(e) => {
                warn!(target: "forecast", %coin, error = %e, "image lookup failed, publishing without image");
                None
            }
        };

        let post = PostRequest::featured(title(&report.coin), render_html(&report), image);
        if let Err(e) = bounded(cancel, self.call_timeout, self.publisher.publish(&post)).await {
            counter!("forecast_failures_total").increment(1);
            warn!(target: "forecast", %coin, error = %e, "forecast publish failed");
            return Err(ForecastError::Publish(e));
        }

        counter!("forecast_published_total").increment(1);
        info!(
            target: "forecast",
            coin = %report.coin,
            price = report.price.value,
            change_24h = ?report.change_24h,
            "weekly forecast published"
        );
        Ok(report)
    }
}
