//! Retry and circuit breaking around a [`FeedSource`](crate::feed::FeedSource).
//!
//! ```text
//! Closed → Open:      consecutive failed invocations >= threshold within window
//! Open → HalfOpen:    cool-down elapsed (checked on the next invocation)
//! HalfOpen → Closed:  the single trial fetch succeeds
//! HalfOpen → Open:    the trial fetch fails; cool-down restarts
//! ```
//!
//! Failures are counted per invocation, after retries are exhausted, not per
//! attempt. Network and parse failures both count.

mod circuit;
mod retry;
mod wrapper;

pub use circuit::{
    CircuitBreaker, CircuitConfig, CircuitOpenError, CircuitSnapshot, CircuitState, Permit,
    Transition,
};
pub use retry::{Backoff, RetryPolicy};
pub use wrapper::{Outcome, ResilientFetcher, SuppressReason};
