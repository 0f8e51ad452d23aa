//! Crypto Bunker: binary entrypoint.
//! Wires the store, external clients, background jobs and the read API, then
//! serves until Ctrl-C / SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crypto_bunker::analytics::Analytics;
use crypto_bunker::api::{self, AppState};
use crypto_bunker::clock::{Clock, SystemClock};
use crypto_bunker::config::{load_feeds_default, AppConfig, LogFormat};
use crypto_bunker::forecast::ForecastAssembler;
use crypto_bunker::ingest::{FeedSource, HttpScraper, Pipeline, PipelineConfig, RssFeed};
use crypto_bunker::jobs::{self, FeedJob, ForecastJob, JobIntervals, MarketJob};
use crypto_bunker::market::{CoinMarketCapClient, ValueCache};
use crypto_bunker::metrics::Metrics;
use crypto_bunker::oracle::{GeminiModel, LlmOracles, UnsplashClient};
use crypto_bunker::publish::{GhostAdminKey, GhostPublisher};
use crypto_bunker::store::{SqliteStore, Store};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => {},
    }
    info!("shutdown requested");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cfg = AppConfig::from_env()?;
    init_tracing(cfg.log_format);
    info!(config = ?cfg, "starting");

    let metrics = Metrics::init().context("installing prometheus recorder")?;
    let feeds_cfg = load_feeds_default().context("loading feeds config")?;
    let timeout = cfg.call_timeout;

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&cfg.database_url)
            .await
            .with_context(|| format!("opening store at {}", cfg.database_url))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let quotes = Arc::new(CoinMarketCapClient::new(cfg.coinmarketcap_api_key.clone(), timeout)?);
    let cache = Arc::new(
        ValueCache::new(store.clone(), quotes, clock.clone()).with_call_timeout(timeout),
    );
    let analytics = Arc::new(Analytics::new(store.clone(), clock.clone()));

    let llm = Arc::new(LlmOracles::new(GeminiModel::new(
        cfg.gemini_api_key.clone(),
        cfg.gemini_model.clone(),
        timeout,
    )?));
    let images = Arc::new(UnsplashClient::new(cfg.unsplash_access_key.clone(), timeout)?);

    let ghost_key = match cfg.ghost_admin_key.as_deref().map(GhostAdminKey::parse) {
        Some(Ok(k)) => Some(k),
        Some(Err(e)) => {
            warn!(error = %e, "ignoring invalid GHOST_ADMIN_KEY; publishing disabled");
            None
        }
        None => None,
    };
    let publisher = Arc::new(GhostPublisher::new(cfg.ghost_url.clone(), ghost_key, timeout)?);

    let mut scraper = HttpScraper::new(timeout)?;
    if let Some(dir) = &cfg.page_cache_dir {
        scraper = scraper.with_cache_dir(dir);
    }

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(scraper),
        llm.clone(),
        llm.clone(),
        images.clone(),
        publisher.clone(),
        clock.clone(),
        PipelineConfig {
            target_coin: feeds_cfg.sentiment_coin.clone(),
            call_timeout: timeout,
            ..PipelineConfig::default()
        },
    ));
    let feeds = feeds_cfg
        .feeds
        .iter()
        .map(|url| RssFeed::from_url(url, timeout).map(|f| Arc::new(f) as Arc<dyn FeedSource>))
        .collect::<Result<Vec<_>, _>>()?;

    let assembler = Arc::new(
        ForecastAssembler::new(
            cache.clone(),
            analytics.clone(),
            llm,
            images,
            publisher,
            clock.clone(),
        )
        .with_call_timeout(timeout),
    );

    let cancel = CancellationToken::new();
    let handles = jobs::spawn_all(
        Arc::new(MarketJob::new(cache.clone(), feeds_cfg.coins.clone())),
        Arc::new(ForecastJob::new(
            assembler,
            feeds_cfg.forecast_coins.clone(),
            clock.clone(),
        )),
        Arc::new(FeedJob::new(pipeline, feeds)),
        JobIntervals {
            market: cfg.market_interval,
            forecast: cfg.forecast_interval,
            feeds: cfg.feed_interval,
        },
        &cancel,
    );

    let state = AppState {
        cache,
        analytics,
        clock,
        cancel: cancel.clone(),
    };
    let app = api::router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    for h in handles {
        if let Err(e) = h.await {
            warn!(error = %e, "job task ended abnormally");
        }
    }
    info!("stopped");
    Ok(())
}
