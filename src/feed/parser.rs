use crate::article::Article;
use crate::feed::FetchError;
use chrono::{DateTime, Utc};
use feed_rs::parser;

/// Parses a feed document into articles, preserving document order.
///
/// Entries without a published timestamp are stamped with `fetched_at`, even
/// when they carry an updated timestamp. The description is the entry summary
/// only; full content bodies are not copied. Every entry yields exactly one
/// article and nothing is filtered.
pub fn parse_feed(
    bytes: &[u8],
    source: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Article>, FetchError> {
    let feed = parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    let articles = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let description = entry.summary.map(|s| s.content).unwrap_or_default();
            let author = entry
                .authors
                .into_iter()
                .map(|p| p.name)
                .find(|name| !name.trim().is_empty());
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let published_date = entry.published.unwrap_or(fetched_at);

            Article {
                title,
                link,
                description,
                author,
                published_date,
                source: source.to_string(),
            }
        })
        .collect();

    Ok(articles)
}
