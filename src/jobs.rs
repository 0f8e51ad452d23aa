// src/jobs.rs
//! Periodic background jobs: market refresh, weekly forecast, feed check.
//!
//! Each job runs on its own interval. A tick that fires while the previous run
//! of the same job is still active is skipped, never queued.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::forecast::{is_forecast_day, ForecastAssembler};
use crate::ingest::{FeedReport, FeedSource, Pipeline};
use crate::market::{refresh_all, RefreshSummary, ValueCache, MARKET_PACING};
use crate::runtime::JobGuard;

/// Run `fut` under `guard`; `None` when a previous run still holds it.
pub async fn run_guarded<T, F>(job: &'static str, guard: &JobGuard, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    let Some(_running) = guard.try_start() else {
        counter!("jobs_overlap_skipped_total", "job" => job).increment(1);
        warn!(target: "jobs", job, "previous run still active, tick skipped");
        return None;
    };
    let out = fut.await;
    counter!("jobs_runs_total", "job" => job).increment(1);
    gauge!("jobs_last_run_ts", "job" => job).set(chrono::Utc::now().timestamp() as f64);
    Some(out)
}

/// Spawn a job that ticks every `every` until `cancel` fires.
///
/// Each run is spawned as its own task, so a slow run does not delay the ticker
/// and overlapping ticks are visible to the guard. After cancellation the
/// returned handle resolves only once every in-flight run has finished.
pub fn spawn_periodic<F, Fut>(
    job: &'static str,
    every: Duration,
    cancel: CancellationToken,
    run: F,
) -> JoinHandle<()>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let run = Arc::new(run);
    tokio::spawn(async move {
        let guard = JobGuard::new();
        let runs = TaskTracker::new();
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(target: "jobs", job, every_secs = every.as_secs(), "job scheduled");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let guard = guard.clone();
            let run = run.clone();
            let token = cancel.clone();
            runs.spawn(async move {
                run_guarded(job, &guard, run(token)).await;
            });
        }

        runs.close();
        if !runs.is_empty() {
            info!(target: "jobs", job, in_flight = runs.len(), "waiting for in-flight runs");
        }
        runs.wait().await;
        info!(target: "jobs", job, "job stopped");
    })
}

/// Claim `today` in `slot`; `false` when it was already claimed.
fn claim_day(slot: &Mutex<Option<NaiveDate>>, today: NaiveDate) -> bool {
    let mut last = slot.lock().unwrap_or_else(|e| e.into_inner());
    if *last == Some(today) {
        return false;
    }
    *last = Some(today);
    true
}

pub struct MarketJob {
    cache: Arc<ValueCache>,
    coins: Vec<String>,
    pacing: Duration,
}

impl MarketJob {
    pub fn new(cache: Arc<ValueCache>, coins: Vec<String>) -> Self {
        Self {
            cache,
            coins,
            pacing: MARKET_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub async fn run(&self, cancel: &CancellationToken) -> RefreshSummary {
        refresh_all(&self.cache, &self.coins, self.pacing, cancel).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForecastRun {
    NotForecastDay,
    AlreadyRanToday,
    Ran { published: usize, failed: usize },
}

/// Checked daily; publishes once per forecast day.
pub struct ForecastJob {
    assembler: Arc<ForecastAssembler>,
    coins: Vec<String>,
    clock: Arc<dyn Clock>,
    last_run_day: Mutex<Option<NaiveDate>>,
}

impl ForecastJob {
    pub fn new(assembler: Arc<ForecastAssembler>, coins: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            assembler,
            coins,
            clock,
            last_run_day: Mutex::new(None),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> ForecastRun {
        let now = self.clock.now();
        if !is_forecast_day(now) {
            debug!(target: "forecast", "not a forecast day");
            return ForecastRun::NotForecastDay;
        }
        let today = now.date_naive();
        if !claim_day(&self.last_run_day, today) {
            return ForecastRun::AlreadyRanToday;
        }

        let (mut published, mut failed) = (0, 0);
        for coin in &self.coins {
            if cancel.is_cancelled() {
                break;
            }
            match self.assembler.publish_weekly(coin, cancel).await {
                Ok(_) => published += 1,
                Err(_) => failed += 1,
            }
        }
        info!(target: "forecast", published, failed, "weekly forecast run finished");
        ForecastRun::Ran { published, failed }
    }
}

pub struct FeedJob {
    pipeline: Arc<Pipeline>,
    feeds: Vec<Arc<dyn FeedSource>>,
}

impl FeedJob {
    pub fn new(pipeline: Arc<Pipeline>, feeds: Vec<Arc<dyn FeedSource>>) -> Self {
        Self { pipeline, feeds }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Vec<FeedReport> {
        self.pipeline.run_all(&self.feeds, cancel).await
    }
}

pub struct JobIntervals {
    pub market: Duration,
    pub forecast: Duration,
    pub feeds: Duration,
}

/// Start all three jobs; the handles finish once `cancel` fires.
pub fn spawn_all(
    market: Arc<MarketJob>,
    forecast: Arc<ForecastJob>,
    feeds: Arc<FeedJob>,
    every: JobIntervals,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_periodic("market", every.market, cancel.clone(), move |c| {
            let job = market.clone();
            async move {
                job.run(&c).await;
            }
        }),
        spawn_periodic("forecast", every.forecast, cancel.clone(), move |c| {
            let job = forecast.clone();
            async move {
                job.run(&c).await;
            }
        }),
        spawn_periodic("feeds", every.feeds, cancel.clone(), move |c| {
            let job = feeds.clone();
            async move {
                job.run(&c).await;
            }
        }),
    ]
}
