//! Publisher sink: hands articles to the message broker one at a time.
//!
//! - [`Publisher`] - the broker client seam (`publish(destination, article)`)
//! - [`PublisherSink`] - fixed destination, per-article timeout, best-effort batches
//! - [`AmqpPublisher`] - RabbitMQ via `lapin` (feature `amqp`)
//! - [`JsonLinesPublisher`] - writes one JSON object per line, for dry runs
//!
//! Publish failures never touch the feed's circuit breaker.

#[cfg(feature = "amqp")]
mod amqp;
mod json_lines;

#[cfg(feature = "amqp")]
pub use amqp::AmqpPublisher;
pub use json_lines::JsonLinesPublisher;

use crate::article::Article;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize article: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("Broker rejected message")]
    Nacked,
    #[cfg(feature = "amqp")]
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),
    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers one serialized article to a named destination.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, destination: &str, article: &Article) -> Result<(), PublishError>;
}

/// Counts for one batch handed to [`PublisherSink::publish_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub published: usize,
    pub failed: usize,
}

/// Publishes to a fixed destination, bounding each call by a timeout.
#[derive(Clone)]
pub struct PublisherSink {
    publisher: Arc<dyn Publisher>,
    destination: String,
    timeout: Duration,
}

impl PublisherSink {
    /// Creates a sink that sends every article to `destination`.
    ///
    /// # Arguments
    ///
    /// * `publisher` - Broker seam that performs the actual send
    /// * `destination` - Queue or routing key shared by all articles of the feed
    /// * `timeout` - Upper bound on a single publish call
    pub fn new(
        publisher: Arc<dyn Publisher>,
        destination: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            destination: destination.into(),
            timeout,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Publishes one article, bounded by the sink timeout.
    pub async fn publish(&self, article: &Article) -> Result<(), PublishError> {
        tokio::time::timeout(
            self.timeout,
            self.publisher.publish(&self.destination, article),
        )
        .await
        .map_err(|_| PublishError::Timeout(self.timeout))?
    }

    /// Publishes every article in order, each exactly once.
    ///
    /// A failure is logged and skipped; later articles are still attempted.
    pub async fn publish_all(&self, articles: &[Article]) -> BatchReport {
        let mut report = BatchReport::default();

        for article in articles {
            report.attempted += 1;
            match self.publish(article).await {
                Ok(()) => {
                    report.published += 1;
                    tracing::debug!(
                        destination = %self.destination,
                        title = %article.title,
                        "Published article"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        destination = %self.destination,
                        link = %article.link,
                        error = %e,
                        "Failed to publish article, skipping"
                    );
                }
            }
        }

        report
    }
}
