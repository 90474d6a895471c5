//! Scheduler timing with a paused clock and an in-process feed source.

use async_trait::async_trait;
use chrono::Utc;
use feedpump::article::Article;
use feedpump::feed::{FeedSource, FetchError};
use feedpump::pipeline::Pipeline;
use feedpump::publish::{PublishError, Publisher, PublisherSink};
use feedpump::resilience::{CircuitBreaker, CircuitConfig, ResilientFetcher, RetryPolicy};
use feedpump::scheduler::{Scheduler, SchedulerStats};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct SlowSource {
    duration: Duration,
    fail: bool,
    started: AtomicUsize,
    finished: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl SlowSource {
    fn new(duration: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            duration,
            fail,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FeedSource for SlowSource {
    fn url(&self) -> &str {
        "https://feed.test/rss"
    }

    async fn fetch(&self) -> Result<Vec<Article>, FetchError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        tokio::time::sleep(self.duration).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FetchError::Timeout(self.duration));
        }
        Ok(vec![Article {
            title: "tick".into(),
            link: "https://feed.test/1".into(),
            description: String::new(),
            author: None,
            published_date: Utc::now(),
            source: "Test".into(),
        }])
    }
}

#[derive(Default)]
struct CountingPublisher {
    count: AtomicUsize,
}

#[async_trait]
impl Publisher for CountingPublisher {
    async fn publish(&self, _destination: &str, _article: &Article) -> Result<(), PublishError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn pipeline(
    source: Arc<SlowSource>,
    publisher: Arc<CountingPublisher>,
    threshold: u32,
) -> Arc<Pipeline> {
    let circuit = CircuitBreaker::new(
        CircuitConfig {
            failure_threshold: threshold,
            window: Duration::from_secs(3600),
            cooldown: Duration::from_secs(1000),
        },
        Instant::now(),
    );
    let fetcher = ResilientFetcher::new(source, RetryPolicy::fixed(1, Duration::ZERO), circuit);
    let sink = PublisherSink::new(publisher, "q", Duration::from_secs(5));
    Arc::new(Pipeline::new(fetcher, sink))
}

async fn run_for(scheduler: Scheduler, secs: u64) -> SchedulerStats {
    scheduler
        .run(tokio::time::sleep(Duration::from_secs(secs)))
        .await
}

#[tokio::test(start_paused = true)]
async fn test_fires_at_fixed_rate_starting_immediately() {
    let source = SlowSource::new(Duration::from_secs(1), false);
    let publisher = Arc::new(CountingPublisher::default());
    let pipeline = pipeline(source.clone(), publisher.clone(), 5);
    let scheduler = Scheduler::new(pipeline, Duration::from_secs(10));

    // Ticks at 0, 10, 20, 30
    let stats = run_for(scheduler, 35).await;

    assert_eq!(stats.fired, 4);
    assert_eq!(stats.skipped, 0);
    assert_eq!(source.started.load(Ordering::SeqCst), 4);
    assert_eq!(publisher.count.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_slow_cycles_overlap_by_default() {
    let source = SlowSource::new(Duration::from_secs(25), false);
    let publisher = Arc::new(CountingPublisher::default());
    let pipeline = pipeline(source.clone(), publisher.clone(), 5);
    let scheduler = Scheduler::new(pipeline, Duration::from_secs(10));

    let stats = run_for(scheduler, 35).await;

    assert_eq!(stats.fired, 4);
    assert!(source.max_running.load(Ordering::SeqCst) > 1);
}

#[tokio::test(start_paused = true)]
async fn test_prevent_overlap_skips_ticks_while_running() {
    let source = SlowSource::new(Duration::from_secs(25), false);
    let publisher = Arc::new(CountingPublisher::default());
    let pipeline = pipeline(source.clone(), publisher.clone(), 5);
    let scheduler = Scheduler::new(pipeline, Duration::from_secs(10)).prevent_overlap(true);

    // 0 fires (runs until 25), 10 and 20 skip, 30 fires
    let stats = run_for(scheduler, 35).await;

    assert_eq!(
        stats,
        SchedulerStats {
            fired: 2,
            skipped: 2
        }
    );
    assert_eq!(source.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_cycles() {
    let source = SlowSource::new(Duration::from_secs(25), false);
    let publisher = Arc::new(CountingPublisher::default());
    let pipeline = pipeline(source.clone(), publisher.clone(), 5);
    let scheduler = Scheduler::new(pipeline, Duration::from_secs(10));

    let stats = run_for(scheduler, 5).await;

    assert_eq!(stats.fired, 1);
    assert_eq!(source.finished.load(Ordering::SeqCst), 1);
    assert_eq!(publisher.count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cycles_keep_schedule_and_open_circuit() {
    let source = SlowSource::new(Duration::from_secs(1), true);
    let publisher = Arc::new(CountingPublisher::default());
    let pipeline = pipeline(source.clone(), publisher.clone(), 2);
    let scheduler = Scheduler::new(pipeline, Duration::from_secs(10));

    let stats = run_for(scheduler, 35).await;

    // Every tick still fires; after two failures the circuit skips the network
    assert_eq!(stats.fired, 4);
    assert_eq!(source.started.load(Ordering::SeqCst), 2);
    assert_eq!(publisher.count.load(Ordering::SeqCst), 0);
}
