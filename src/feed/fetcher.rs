use crate::article::{Article, Clock};
use crate::feed::parser::parse_feed;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching and parsing a feed.
///
/// Every variant except [`FetchError::Parse`] is a transport problem; see
/// [`FetchError::kind`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured fetch timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Coarse classification used for logging and suppression reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    Parse,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchErrorKind::Network => f.write_str("network"),
            FetchErrorKind::Parse => f.write_str("parse"),
        }
    }
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Parse(_) => FetchErrorKind::Parse,
            FetchError::Network(_)
            | FetchError::HttpStatus(_)
            | FetchError::Timeout(_)
            | FetchError::ResponseTooLarge
            | FetchError::IncompleteResponse { .. } => FetchErrorKind::Network,
        }
    }
}

/// Something that can produce the current articles of one feed.
///
/// One call is one attempt: implementations must not retry internally.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// URL of the feed, for logging.
    fn url(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<Article>, FetchError>;
}

/// Fetches a feed over HTTP(S) and parses it with [`parse_feed`].
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
    source: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HttpFeedSource {
    /// Creates a source for one feed URL.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client; connection pooling is per client
    /// * `url` - Feed URL requested on every fetch
    /// * `source` - Label copied into each article's `source` field
    /// * `timeout` - Upper bound on the whole fetch, body included
    /// * `clock` - Supplies the publish date for entries that carry none
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        source: impl Into<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            source: source.into(),
            timeout,
            clock,
        }
    }

    async fn fetch_bytes(&self) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<Article>, FetchError> {
        let fetched_at = self.clock.now();

        // Timeout covers the whole exchange, body included
        let bytes = tokio::time::timeout(self.timeout, self.fetch_bytes())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        let articles = parse_feed(&bytes, &self.source, fetched_at)?;
        tracing::debug!(
            feed = %self.url,
            bytes = bytes.len(),
            entries = articles.len(),
            "Fetched feed"
        );
        Ok(articles)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::FixedClock;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Test</title>
    <item><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn source_for(server: &MockServer, timeout: Duration) -> HttpFeedSource {
        HttpFeedSource::new(
            reqwest::Client::new(),
            format!("{}/feed", server.uri()),
            "Test",
            timeout,
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
        )
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = source_for(&mock_server, Duration::from_secs(5));
        let articles = source.fetch().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].source, "Test");
        assert_eq!(
            articles[0].published_date,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_500_is_network_kind_and_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = source_for(&mock_server, Duration::from_secs(5));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
        assert_eq!(err.kind(), FetchErrorKind::Network);
    }

    #[tokio::test]
    async fn test_404_is_network_kind() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let source = source_for(&mock_server, Duration::from_secs(5));
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Network);
    }

    #[tokio::test]
    async fn test_malformed_feed_is_parse_kind() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let source = source_for(&mock_server, Duration::from_secs(5));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert_eq!(err.kind(), FetchErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let source = source_for(&mock_server, Duration::from_millis(100));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert_eq!(err.kind(), FetchErrorKind::Network);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_kind() {
        let source = HttpFeedSource::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/feed",
            "Test",
            Duration::from_secs(5),
            Arc::new(FixedClock(Utc::now())),
        );
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Network);
    }
}
