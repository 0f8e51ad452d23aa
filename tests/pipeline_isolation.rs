// tests/pipeline_isolation.rs
//
// A failure while processing one item never stops the rest of the batch, and
// each failing stage leaves the store in a well-defined state.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{
    clock, BrokenFeed, RecordingPublisher, StaticFeed, StubImages, StubParaphraser, StubScraper,
    StubSentiment,
};
use crypto_bunker::ingest::{
    FeedSource, ItemOutcome, Pipeline, PipelineConfig, ScrapeFailurePolicy, Stage,
};
use crypto_bunker::publish::{PostStatus, Visibility};
use crypto_bunker::store::{MemoryStore, Sentiment};

const A: &str = "https://n.example/a";
const B: &str = "https://n.example/b";
const C: &str = "https://n.example/c";

struct Parts {
    store: Arc<MemoryStore>,
    scraper: Arc<StubScraper>,
    paraphraser: Arc<StubParaphraser>,
    sentiment: Arc<StubSentiment>,
    images: Arc<StubImages>,
    publisher: Arc<RecordingPublisher>,
    cfg: PipelineConfig,
}

impl Parts {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            scraper: Arc::new(StubScraper::default()),
            paraphraser: StubParaphraser::failing_on(&[]),
            sentiment: StubSentiment::always("0"),
            images: StubImages::ok(),
            publisher: RecordingPublisher::new(),
            cfg: PipelineConfig {
                item_pacing: Duration::from_secs(30),
                ..PipelineConfig::default()
            },
        }
    }

    fn build(&self) -> Pipeline {
        Pipeline::new(
            self.store.clone(),
            self.scraper.clone(),
            self.paraphraser.clone(),
            self.sentiment.clone(),
            self.images.clone(),
            self.publisher.clone(),
            clock(),
            self.cfg.clone(),
        )
    }
}

fn aborted_at(outcome: Option<&ItemOutcome>) -> Option<Stage> {
    match outcome {
        Some(ItemOutcome::Aborted { stage, .. }) => Some(*stage),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn paraphrase_failure_isolated_to_its_item() {
    let mut parts = Parts::new();
    parts.paraphraser = StubParaphraser::failing_on(&["/b"]);
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A, B, C]);

    let report = pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    assert_eq!(report.outcome_of(A), Some(&ItemOutcome::Published));
    assert_eq!(aborted_at(report.outcome_of(B)), Some(Stage::Transform));
    assert_eq!(report.outcome_of(C), Some(&ItemOutcome::Published));

    let posts = parts.publisher.posts();
    assert_eq!(posts.len(), 2);
    assert!(posts[0].html.contains(A));
    assert!(posts[1].html.contains(C));
    // the failed item may be retried on the next run
    assert!(!parts.store.seen_urls().contains(&B.to_string()));
    assert_eq!(parts.store.sentiments().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_sentiment_aborts_without_recording() {
    let mut parts = Parts::new();
    parts.sentiment = StubSentiment::with("+1", &[("/b", "probably positive")]);
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A, B]);

    let report = pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    assert_eq!(aborted_at(report.outcome_of(B)), Some(Stage::Score));
    let rows = parts.store.sentiments();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source, A);
    assert_eq!(rows[0].sentiment, Sentiment::Positive);
    assert_eq!(parts.store.seen_urls(), vec![A.to_string()]);
    assert_eq!(parts.publisher.posts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sentiment_is_scored_on_original_headline_for_target_coin() {
    let mut parts = Parts::new();
    parts.cfg.target_coin = "ETH".into();
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A]);

    pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    let calls = parts.sentiment.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![(format!("Headline for {A}"), "ETH".to_string())]);
    assert_eq!(parts.store.sentiments()[0].coin, "ETH");
}

#[tokio::test(start_paused = true)]
async fn post_carries_paraphrase_attribution_and_image() {
    let parts = Parts::new();
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A]);

    pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    let req = parts.paraphraser.requests.lock().unwrap()[0].clone();
    assert_eq!(req.attribution, "Example News");
    assert_eq!(req.text, format!("Full article text of {A}."));

    let post = &parts.publisher.posts()[0];
    assert_eq!(post.title, format!("New: Headline for {A}"));
    assert!(post.html.ends_with(&format!("<br><br><a href='{A}'>Source</a>")));
    assert_eq!(post.feature_image.as_deref(), Some("https://images.example/small.jpg"));
    assert!(!post.featured);
    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(post.visibility, Visibility::Public);
}

#[tokio::test(start_paused = true)]
async fn image_failure_still_publishes_without_image() {
    let mut parts = Parts::new();
    parts.images = StubImages::down();
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A]);

    let report = pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    assert_eq!(report.outcome_of(A), Some(&ItemOutcome::Published));
    assert_eq!(parts.publisher.posts()[0].feature_image, None);
}

#[tokio::test(start_paused = true)]
async fn scrape_failure_aborts_by_default() {
    let mut parts = Parts::new();
    parts.scraper = StubScraper::failing(&[A]);
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A, B]);

    let report = pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    assert_eq!(aborted_at(report.outcome_of(A)), Some(Stage::Scrape));
    assert_eq!(report.outcome_of(B), Some(&ItemOutcome::Published));
    assert_eq!(parts.paraphraser.requests.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn scrape_failure_can_proceed_with_empty_text() {
    let mut parts = Parts::new();
    parts.scraper = StubScraper::failing(&[A]);
    parts.cfg.scrape_policy = ScrapeFailurePolicy::ProceedEmpty;
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A]);

    let report = pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    assert_eq!(report.outcome_of(A), Some(&ItemOutcome::Published));
    assert_eq!(parts.paraphraser.requests.lock().unwrap()[0].text, "");
}

#[tokio::test(start_paused = true)]
async fn publish_failure_leaves_item_recorded_as_seen() {
    let parts = Parts::new();
    parts.publisher.set_fail(true);
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A]);
    let cancel = CancellationToken::new();

    let report = pipeline.run_feed(feed.as_ref(), &cancel).await;
    assert_eq!(aborted_at(report.outcome_of(A)), Some(Stage::Publish));
    assert_eq!(parts.store.seen_urls(), vec![A.to_string()]);
    assert_eq!(parts.store.sentiments().len(), 1);

    // not retried once the publisher recovers
    parts.publisher.set_fail(false);
    let again = pipeline.run_feed(feed.as_ref(), &cancel).await;
    assert_eq!(again.outcome_of(A), Some(&ItemOutcome::Skipped));
    assert!(parts.publisher.posts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn recording_failure_aborts_before_publish() {
    let parts = Parts::new();
    parts.store.set_fail_writes(true);
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A]);

    let report = pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    assert_eq!(aborted_at(report.outcome_of(A)), Some(Stage::Recording));
    assert!(parts.publisher.posts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dedup_check_failure_aborts_item() {
    let parts = Parts::new();
    parts.store.set_fail_reads(true);
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A]);

    let report = pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    assert_eq!(aborted_at(report.outcome_of(A)), Some(Stage::DedupCheck));
    assert!(parts.scraper.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn broken_feed_does_not_stop_the_next_one() {
    let parts = Parts::new();
    let pipeline = parts.build();
    let feeds = vec![
        Arc::new(BrokenFeed) as Arc<dyn FeedSource>,
        StaticFeed::new("good", &[A]) as Arc<dyn FeedSource>,
    ];

    let reports = pipeline.run_all(&feeds, &CancellationToken::new()).await;

    assert_eq!(reports.len(), 2);
    assert!(reports[0].fetch_error.is_some());
    assert!(reports[0].items.is_empty());
    assert_eq!(reports[1].feed, "good");
    assert_eq!(reports[1].published(), 1);
}

#[tokio::test(start_paused = true)]
async fn scraped_items_are_paced() {
    let parts = Parts::new();
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A, B, C]);

    let started = tokio::time::Instant::now();
    let report = pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    assert_eq!(report.published(), 3);
    // first item immediately, then 30s between the next two
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(started.elapsed() < Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_pacing_stops_the_feed() {
    let parts = Parts::new();
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A, B, C]);
    let cancel = CancellationToken::new();

    let c2 = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        c2.cancel();
    });
    let report = pipeline.run_feed(feed.as_ref(), &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.outcome_of(A), Some(&ItemOutcome::Published));
    assert_eq!(report.outcome_of(B), Some(&ItemOutcome::Cancelled));
    assert_eq!(report.outcome_of(C), None);
    // B was never marked seen, so the next run picks it up
    assert_eq!(parts.store.seen_urls(), vec![A.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn recorded_item_is_still_published_after_cancellation() {
    let mut parts = Parts::new();
    parts.images = StubImages::slow(Duration::from_secs(3));
    let pipeline = parts.build();
    let feed = StaticFeed::new("example", &[A]);
    let cancel = CancellationToken::new();

    let c2 = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        c2.cancel();
    });
    let report = pipeline.run_feed(feed.as_ref(), &cancel).await;

    assert_eq!(report.outcome_of(A), Some(&ItemOutcome::Published));
    let posts = parts.publisher.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].feature_image.is_some());
    assert_eq!(parts.store.seen_urls(), vec![A.to_string()]);
}
