//! The canonical record published downstream, and the clock used to stamp it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized feed entry.
///
/// Serialized with camelCase field names; this is the queue payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: Option<String>,
    pub published_date: DateTime<Utc>,
    pub source: String,
}

/// Wall-clock source for fetch timestamps.
///
/// Injected into the feed source so the "missing published date defaults to
/// fetch time" rule can be tested deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
