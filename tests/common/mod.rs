// tests/common/mod.rs
//
// Call-counting stubs for every external collaborator, shared by the
// integration tests. Each stub records what it was asked and can be told to
// fail for specific inputs.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crypto_bunker::clock::ManualClock;
use crypto_bunker::error::OracleError;
use crypto_bunker::ingest::{ArticleScraper, FeedBatch, FeedItem, FeedSource};
use crypto_bunker::market::{Quote, QuoteSource};
use crypto_bunker::oracle::{
    ForecastOracle, Horizon, ImageOracle, ParaphraseRequest, Paraphrased, Paraphraser,
    SentimentOracle,
};
use crypto_bunker::publish::{PostRequest, PublishedPost, Publisher};
use crypto_bunker::store::Sentiment;

/// Sunday 2024-03-03 12:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap()
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t0()))
}

// ---------- market ----------

pub struct CountingQuotes {
    price: Mutex<Option<f64>>,
    calls: AtomicUsize,
}

impl CountingQuotes {
    /// Returns `price` for every symbol.
    pub fn ok(price: f64) -> Arc<Self> {
        Arc::new(Self {
            price: Mutex::new(Some(price)),
            calls: AtomicUsize::new(0),
        })
    }

    /// Fails every call as if the upstream were down.
    pub fn down() -> Arc<Self> {
        Arc::new(Self {
            price: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for CountingQuotes {
    async fn latest(&self, symbol: &str) -> Result<Quote, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.price.lock().unwrap() {
            Some(p) => Ok(Quote {
                symbol: symbol.to_string(),
                name: None,
                price_usd: p,
                last_updated: None,
            }),
            None => Err(OracleError::Api {
                status: 503,
                message: "upstream down".into(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

// ---------- feeds ----------

pub struct StaticFeed {
    pub name: String,
    pub batch: FeedBatch,
    pub fetches: AtomicUsize,
}

impl StaticFeed {
    pub fn new(name: &str, urls: &[&str]) -> Arc<Self> {
        let items = urls
            .iter()
            .map(|u| FeedItem {
                title: format!("Headline for {u}"),
                link: u.to_string(),
                published_at: None,
            })
            .collect();
        Arc::new(Self {
            name: name.to_string(),
            batch: FeedBatch {
                source_name: "Example News".into(),
                items,
            },
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn fetch_latest(&self) -> Result<FeedBatch, OracleError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.batch.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct BrokenFeed;

#[async_trait]
impl FeedSource for BrokenFeed {
    async fn fetch_latest(&self) -> Result<FeedBatch, OracleError> {
        Err(OracleError::Api {
            status: 502,
            message: "bad gateway".into(),
        })
    }

    fn name(&self) -> &str {
        "broken"
    }
}

// ---------- pipeline collaborators ----------

/// Fails for URLs in `fail`; otherwise returns a short article.
#[derive(Default)]
pub struct StubScraper {
    pub fail: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl StubScraper {
    pub fn failing(urls: &[&str]) -> Arc<Self> {
        let s = Self::default();
        s.fail.lock().unwrap().extend(urls.iter().map(|u| u.to_string()));
        Arc::new(s)
    }
}

#[async_trait]
impl ArticleScraper for StubScraper {
    async fn scrape(&self, url: &str) -> Result<String, OracleError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.fail.lock().unwrap().contains(url) {
            return Err(OracleError::Api {
                status: 404,
                message: format!("fetching {url}"),
            });
        }
        Ok(format!("Full article text of {url}."))
    }
}

/// Fails when the headline contains one of `fail_markers`.
#[derive(Default)]
pub struct StubParaphraser {
    pub fail_markers: Vec<String>,
    pub requests: Mutex<Vec<ParaphraseRequest>>,
}

impl StubParaphraser {
    pub fn failing_on(markers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_markers: markers.iter().map(|m| m.to_string()).collect(),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Paraphraser for StubParaphraser {
    async fn paraphrase(&self, req: &ParaphraseRequest) -> Result<Paraphrased, OracleError> {
        self.requests.lock().unwrap().push(req.clone());
        if self.fail_markers.iter().any(|m| req.headline.contains(m.as_str())) {
            return Err(OracleError::Empty("paraphrase body"));
        }
        Ok(Paraphrased {
            body: format!("<p>Rewritten: {}</p>", req.text),
            headline: format!("New: {}", req.headline),
        })
    }
}

/// Replies with raw text per headline marker; parsed the same way as real replies.
pub struct StubSentiment {
    pub default_reply: String,
    pub replies: Vec<(String, String)>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl StubSentiment {
    pub fn always(reply: &str) -> Arc<Self> {
        Self::with(reply, &[])
    }

    pub fn with(default_reply: &str, replies: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            default_reply: default_reply.to_string(),
            replies: replies
                .iter()
                .map(|(m, r)| (m.to_string(), r.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SentimentOracle for StubSentiment {
    async fn score(&self, headline: &str, coin: &str) -> Result<Sentiment, OracleError> {
        self.calls
            .lock()
            .unwrap()
            .push((headline.to_string(), coin.to_string()));
        let reply = self
            .replies
            .iter()
            .find(|(m, _)| headline.contains(m.as_str()))
            .map(|(_, r)| r.as_str())
            .unwrap_or(&self.default_reply);
        reply.parse()
    }
}

pub struct StubImages {
    pub url: Option<String>,
    pub delay: std::time::Duration,
}

impl StubImages {
    pub fn ok() -> Arc<Self> {
        Self::slow(std::time::Duration::ZERO)
    }

    pub fn down() -> Arc<Self> {
        Arc::new(Self {
            url: None,
            delay: std::time::Duration::ZERO,
        })
    }

    /// Succeeds after sleeping for `delay`.
    pub fn slow(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            url: Some("https://images.example/small.jpg".into()),
            delay,
        })
    }
}

#[async_trait]
impl ImageOracle for StubImages {
    async fn image_url(&self, _query: &str) -> Result<String, OracleError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.url
            .clone()
            .ok_or_else(|| OracleError::Config("UNSPLASH_ACCESS_KEY not set".into()))
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub posts: Mutex<Vec<PostRequest>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn posts(&self) -> Vec<PostRequest> {
        self.posts.lock().unwrap().clone()
    }

    pub fn set_fail(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, post: &PostRequest) -> Result<PublishedPost, OracleError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OracleError::Api {
                status: 500,
                message: "ghost down".into(),
            });
        }
        self.posts.lock().unwrap().push(post.clone());
        Ok(PublishedPost {
            id: Some(format!("post-{}", self.posts.lock().unwrap().len())),
            url: None,
        })
    }
}

// ---------- forecast ----------

/// Replies per horizon with raw text, parsed like a real model reply.
pub struct StubForecast {
    pub replies: Vec<(Horizon, String)>,
    pub samples_seen: Mutex<Vec<Vec<f64>>>,
}

impl StubForecast {
    pub fn new(week: &str, month: &str, quarter: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: vec![
                (Horizon::OneWeek, week.to_string()),
                (Horizon::OneMonth, month.to_string()),
                (Horizon::ThreeMonths, quarter.to_string()),
            ],
            samples_seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ForecastOracle for StubForecast {
    async fn forecast(
        &self,
        _coin: &str,
        horizon: Horizon,
        samples: &[f64],
    ) -> Result<f64, OracleError> {
        self.samples_seen.lock().unwrap().push(samples.to_vec());
        let raw = self
            .replies
            .iter()
            .find(|(h, _)| *h == horizon)
            .map(|(_, r)| r.as_str())
            .unwrap_or_default();
        crypto_bunker::oracle::parse_price(raw)
    }
}
