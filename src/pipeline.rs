//! One poll cycle: guarded fetch, then publish each article in feed order.

use crate::publish::{BatchReport, PublisherSink};
use crate::resilience::{CircuitSnapshot, Outcome, ResilientFetcher, SuppressReason};

/// What a cycle did.
#[derive(Debug)]
pub enum CycleReport {
    Published(BatchReport),
    Suppressed(SuppressReason),
}

/// A feed, its breaker and its sink. One instance per configured feed.
pub struct Pipeline {
    fetcher: ResilientFetcher,
    sink: PublisherSink,
}

impl Pipeline {
    pub fn new(fetcher: ResilientFetcher, sink: PublisherSink) -> Self {
        Self { fetcher, sink }
    }

    pub fn feed_url(&self) -> &str {
        self.fetcher.feed_url()
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.fetcher.circuit_snapshot()
    }

    /// Runs one cycle. Never fails; problems are logged and reported.
    pub async fn run_cycle(&self) -> CycleReport {
        tracing::info!(feed = %self.feed_url(), "Fetching feed");

        let articles = match self.fetcher.invoke().await {
            Outcome::Success(articles) => articles,
            Outcome::Suppressed(reason) => return CycleReport::Suppressed(reason),
        };

        tracing::info!(
            feed = %self.feed_url(),
            count = articles.len(),
            "Fetched articles"
        );

        let report = self.sink.publish_all(&articles).await;
        tracing::info!(
            feed = %self.feed_url(),
            destination = %self.sink.destination(),
            published = report.published,
            failed = report.failed,
            "Cycle complete"
        );
        CycleReport::Published(report)
    }
}
