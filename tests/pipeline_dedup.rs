// tests/pipeline_dedup.rs
//
// An article URL is processed at most once across runs.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{
    clock, RecordingPublisher, StaticFeed, StubImages, StubParaphraser, StubScraper, StubSentiment,
};
use crypto_bunker::ingest::{FeedSource, ItemOutcome, Pipeline, PipelineConfig};
use crypto_bunker::store::MemoryStore;

struct Harness {
    store: Arc<MemoryStore>,
    scraper: Arc<StubScraper>,
    publisher: Arc<RecordingPublisher>,
    pipeline: Pipeline,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let scraper = Arc::new(StubScraper::default());
    let publisher = RecordingPublisher::new();
    let pipeline = Pipeline::new(
        store.clone(),
        scraper.clone(),
        StubParaphraser::failing_on(&[]),
        StubSentiment::always("+1"),
        StubImages::ok(),
        publisher.clone(),
        clock(),
        PipelineConfig {
            item_pacing: Duration::from_secs(1),
            ..PipelineConfig::default()
        },
    );
    Harness {
        store,
        scraper,
        publisher,
        pipeline,
    }
}

#[tokio::test(start_paused = true)]
async fn second_run_skips_every_seen_url() {
    let h = harness();
    let urls = ["https://n.example/a", "https://n.example/b", "https://n.example/c"];
    let feed = StaticFeed::new("example", &urls);
    let cancel = CancellationToken::new();

    let first = h.pipeline.run_feed(feed.as_ref(), &cancel).await;
    assert_eq!(first.published(), 3);
    assert_eq!(h.publisher.posts().len(), 3);

    let second = h.pipeline.run_feed(feed.as_ref(), &cancel).await;
    assert_eq!(second.published(), 0);
    assert_eq!(second.skipped(), 3);
    assert_eq!(feed.fetches.load(Ordering::SeqCst), 2);

    // no second scrape, publish or sentiment row
    assert_eq!(h.scraper.calls.lock().unwrap().len(), 3);
    assert_eq!(h.publisher.posts().len(), 3);
    assert_eq!(h.store.sentiments().len(), 3);
    assert_eq!(h.store.seen_urls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn duplicate_link_across_feeds_is_published_once() {
    let h = harness();
    let a = StaticFeed::new("one", &["https://n.example/shared", "https://n.example/x"]);
    let b = StaticFeed::new("two", &["https://n.example/shared"]);
    let feeds = vec![a as Arc<dyn FeedSource>, b as Arc<dyn FeedSource>];

    let reports = h.pipeline.run_all(&feeds, &CancellationToken::new()).await;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].published(), 2);
    assert_eq!(
        reports[1].outcome_of("https://n.example/shared"),
        Some(&ItemOutcome::Skipped)
    );
    assert_eq!(h.publisher.posts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn sentiment_row_is_keyed_by_article_url() {
    let h = harness();
    let feed = StaticFeed::new("example", &["https://n.example/only"]);
    h.pipeline.run_feed(feed.as_ref(), &CancellationToken::new()).await;

    let rows = h.store.sentiments();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source, "https://n.example/only");
    assert_eq!(rows[0].coin, "BTC");
    assert_eq!(h.store.seen_urls(), vec!["https://n.example/only".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn skipped_items_are_not_paced() {
    let h = harness();
    let seen = StaticFeed::new("example", &["https://n.example/1", "https://n.example/2"]);
    h.pipeline.run_feed(seen.as_ref(), &CancellationToken::new()).await;

    let started = tokio::time::Instant::now();
    let report = h.pipeline.run_feed(seen.as_ref(), &CancellationToken::new()).await;
    assert_eq!(report.skipped(), 2);
    assert!(started.elapsed() < Duration::from_millis(1));
}
