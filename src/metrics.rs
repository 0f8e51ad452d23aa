// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "market_cache_hits_total",
            "Values served from a fresh stored observation."
        );
        describe_counter!(
            "market_refresh_total",
            "Values fetched from the quote source and persisted."
        );
        describe_counter!("market_refresh_failures_total", "Failed quote source calls.");
        describe_counter!(
            "market_stale_fallback_total",
            "Stale values served because the quote source failed."
        );
        describe_counter!(
            "ingest_items_total",
            "Feed items by terminal outcome (skipped, published, aborted, cancelled)."
        );
        describe_counter!("ingest_feed_errors_total", "Feed fetch/parse errors.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_counter!("forecast_published_total", "Weekly reports published.");
        describe_counter!("forecast_failures_total", "Weekly reports that failed.");
        describe_counter!("jobs_runs_total", "Completed job runs by job.");
        describe_counter!(
            "jobs_overlap_skipped_total",
            "Ticks skipped because the previous run was still active."
        );
        describe_gauge!("jobs_last_run_ts", "Unix ts when a job last finished.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe all series.
    pub fn init() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
