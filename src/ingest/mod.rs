// src/ingest/mod.rs
//! News ingestion: feed -> dedup -> scrape -> paraphrase -> score -> publish.
//!
//! Feeds are processed one at a time and items strictly in feed order. Every item
//! ends in exactly one `ItemOutcome`; a failing item never stops its siblings.
//! The URL is marked seen only once a sentiment score has been recorded, so a
//! crash before that point means the item is processed again on the next run.

pub mod rss;
pub mod scrape;
pub mod types;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::OracleError;
use crate::market::DEFAULT_CALL_TIMEOUT;
use crate::oracle::{
    truncate_chars, ImageOracle, ParaphraseRequest, Paraphraser, SentimentOracle, MAX_SOURCE_CHARS,
};
use crate::publish::{with_attribution, PostRequest, Publisher};
use crate::runtime::{bounded, Pacer};
use crate::store::{NewSentiment, Store};

pub use rss::RssFeed;
pub use scrape::{ArticleScraper, HttpScraper};
pub use types::{FeedBatch, FeedItem, FeedSource};

pub const ITEM_PACING: Duration = Duration::from_secs(30);
pub const IMAGE_QUERY: &str = "cryptocurrency";

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Decode entities, strip tags, straighten quotes and collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let stripped = RE_TAGS.replace_all(&decoded, " ");
    let quotes = stripped
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    RE_WS.replace_all(&quotes, " ").trim().to_string()
}

/// What to do when an article page cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrapeFailurePolicy {
    /// End the item as aborted.
    #[default]
    Abort,
    /// Continue with empty article text.
    ProceedEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DedupCheck,
    Scrape,
    Transform,
    Score,
    Recording,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::DedupCheck => "dedup_check",
            Stage::Scrape => "scrape",
            Stage::Transform => "transform",
            Stage::Score => "score",
            Stage::Recording => "recording",
            Stage::Publish => "publish",
        };
        f.write_str(s)
    }
}

/// Terminal state of one feed item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// URL already in the dedup ledger.
    Skipped,
    Published,
    Aborted { stage: Stage, reason: String },
    /// Shutdown requested while the item was in flight.
    Cancelled,
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Skipped => "skipped",
            ItemOutcome::Published => "published",
            ItemOutcome::Aborted { .. } => "aborted",
            ItemOutcome::Cancelled => "cancelled",
        }
    }

    fn from_error(stage: Stage, e: OracleError) -> Self {
        if e.is_cancelled() {
            ItemOutcome::Cancelled
        } else {
            ItemOutcome::Aborted {
                stage,
                reason: e.to_string(),
            }
        }
    }
}

/// Result of one pass over a single feed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedReport {
    pub feed: String,
    pub fetch_error: Option<String>,
    pub items: Vec<(String, ItemOutcome)>,
    pub cancelled: bool,
}

impl FeedReport {
    fn count(&self, label: &str) -> usize {
        self.items.iter().filter(|(_, o)| o.label() == label).count()
    }

    pub fn published(&self) -> usize {
        self.count("published")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn aborted(&self) -> usize {
        self.count("aborted")
    }

    pub fn outcome_of(&self, url: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|(u, _)| u == url).map(|(_, o)| o)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Coin the sentiment oracle scores headlines against.
    pub target_coin: String,
    pub item_pacing: Duration,
    pub call_timeout: Duration,
    pub scrape_policy: ScrapeFailurePolicy,
    pub image_query: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_coin: "BTC".into(),
            item_pacing: ITEM_PACING,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            scrape_policy: ScrapeFailurePolicy::default(),
            image_query: IMAGE_QUERY.into(),
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    scraper: Arc<dyn ArticleScraper>,
    paraphraser: Arc<dyn Paraphraser>,
    sentiment: Arc<dyn SentimentOracle>,
    images: Arc<dyn ImageOracle>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    cfg: PipelineConfig,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        scraper: Arc<dyn ArticleScraper>,
        paraphraser: Arc<dyn Paraphraser>,
        sentiment: Arc<dyn SentimentOracle>,
        images: Arc<dyn ImageOracle>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            store,
            scraper,
            paraphraser,
            sentiment,
            images,
            publisher,
            clock,
            cfg,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Fetch `feed` and process its items in order.
    pub async fn run_feed(&self, feed: &dyn FeedSource, cancel: &CancellationToken) -> FeedReport {
        let mut report = FeedReport {
            feed: feed.name().to_string(),
            ..FeedReport::default()
        };

        let batch = match bounded(cancel, self.cfg.call_timeout, feed.fetch_latest()).await {
            Ok(b) => b,
            Err(e) if e.is_cancelled() => {
                report.cancelled = true;
                return report;
            }
            Err(e) => {
                counter!("ingest_feed_errors_total").increment(1);
                warn!(target: "ingest", feed = %report.feed, error = %e, "feed fetch failed");
                report.fetch_error = Some(e.to_string());
                return report;
            }
        };

        let mut pacer = Pacer::new(self.cfg.item_pacing);
        for item in &batch.items {
            let outcome = self
                .process_item(item, &batch.source_name, &mut pacer, cancel)
                .await;
            counter!("ingest_items_total", "outcome" => outcome.label()).increment(1);

            match &outcome {
                ItemOutcome::Skipped => {
                    debug!(target: "ingest", url = %item.link, "already seen, skipped")
                }
                ItemOutcome::Published => {}
                ItemOutcome::Aborted { stage, reason } => warn!(
                    target: "ingest",
                    url = %item.link,
                    %stage,
                    reason = %reason,
                    "item aborted"
                ),
                ItemOutcome::Cancelled => {}
            }

            let stop = outcome == ItemOutcome::Cancelled;
            report.items.push((item.link.clone(), outcome));
            if stop {
                report.cancelled = true;
                break;
            }
        }

        info!(
            target: "ingest",
            feed = %report.feed,
            items = batch.items.len(),
            published = report.published(),
            skipped = report.skipped(),
            aborted = report.aborted(),
            "feed processed"
        );
        report
    }

    /// Process every feed in order; stops early on cancellation.
    pub async fn run_all(
        &self,
        feeds: &[Arc<dyn FeedSource>],
        cancel: &CancellationToken,
    ) -> Vec<FeedReport> {
        let mut reports = Vec::with_capacity(feeds.len());
        for feed in feeds {
            if cancel.is_cancelled() {
                break;
            }
            let report = self.run_feed(feed.as_ref(), cancel).await;
            let stop = report.cancelled;
            reports.push(report);
            if stop {
                break;
            }
        }
        reports
    }

    /// Drive one item to a terminal state. Pacing applies only to items that
    /// reach the scrape step.
    pub async fn process_item(
        &self,
        item: &FeedItem,
        source_name: &str,
        pacer: &mut Pacer,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        let url = item.link.as_str();
        let timeout = self.cfg.call_timeout;

        match self.store.is_seen(url).await {
            Ok(true) => return ItemOutcome::Skipped,
            Ok(false) => {}
            Err(e) => {
                return ItemOutcome::Aborted {
                    stage: Stage::DedupCheck,
                    reason: e.to_string(),
                }
            }
        }

        if pacer.ready(cancel).await.is_err() {
            return ItemOutcome::Cancelled;
        }

        let text = match bounded(cancel, timeout, self.scraper.scrape(url)).await {
            Ok(t) => t,
            Err(e) if e.is_cancelled() => return ItemOutcome::Cancelled,
            Err(e) => match self.cfg.scrape_policy {
                ScrapeFailurePolicy::Abort => return ItemOutcome::from_error(Stage::Scrape, e),
                ScrapeFailurePolicy::ProceedEmpty => {
                    warn!(target: "ingest", %url, error = %e, "scrape failed, continuing without text");
                    String::new()
                }
            },
        };

        let req = ParaphraseRequest {
            text: truncate_chars(&text, MAX_SOURCE_CHARS).to_string(),
            headline: item.title.clone(),
            attribution: source_name.to_string(),
        };
        let paraphrased = match bounded(cancel, timeout, self.paraphraser.paraphrase(&req)).await {
            Ok(p) => p,
            Err(e) => return ItemOutcome::from_error(Stage::Transform, e),
        };

        let coin = self.cfg.target_coin.as_str();
        let sentiment = match bounded(cancel, timeout, self.sentiment.score(&item.title, coin)).await {
            Ok(s) => s,
            Err(e) => return ItemOutcome::from_error(Stage::Score, e),
        };

        let now = self.clock.now();
        let record = NewSentiment {
            created_at: now,
            coin: coin.to_string(),
            sentiment,
            source: url.to_string(),
        };
        if let Err(e) = self.store.insert_sentiment(&record).await {
            return ItemOutcome::Aborted {
                stage: Stage::Recording,
                reason: e.to_string(),
            };
        }
        if let Err(e) = self.store.mark_seen(url, now).await {
            return ItemOutcome::Aborted {
                stage: Stage::Recording,
                reason: e.to_string(),
            };
        }

        // Already marked seen; image and publish ignore shutdown and keep only
        // the per-call timeout.
        let recorded = CancellationToken::new();
        let image = match bounded(&recorded, timeout, self.images.image_url(&self.cfg.image_query)).await {
            Ok(u) => Some(u),
            Err(e) => {
                warn!(target: "ingest", %url, error = %e, "image lookup failed, publishing without image");
                None
            }
        };

        let post = PostRequest::standard(
            paraphrased.headline,
            with_attribution(&paraphrased.body, url),
            image,
        );
        match bounded(&recorded, timeout, self.publisher.publish(&post)).await {
            Ok(_) => {
                info!(target: "ingest", %url, %sentiment, title = %post.title, "item published");
                ItemOutcome::Published
            }
            Err(e) => ItemOutcome::from_error(Stage::Publish, e),
        }
    }
}
