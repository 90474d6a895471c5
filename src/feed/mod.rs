//! Feed source adapter: fetch a syndication document and normalize its entries.
//!
//! - [`parser`] - RSS/Atom/JSON Feed parsing via `feed-rs`, one
//!   [`Article`](crate::article::Article) per entry
//! - [`fetcher`] - HTTP retrieval with timeout and size limit, behind the [`FeedSource`] trait
//!
//! Neither layer retries; that belongs to [`crate::resilience`].

mod fetcher;
mod parser;

pub use fetcher::{FeedSource, FetchError, FetchErrorKind, HttpFeedSource};
pub use parser::parse_feed;
