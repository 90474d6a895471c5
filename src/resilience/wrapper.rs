use crate::article::Article;
use crate::feed::{FeedSource, FetchErrorKind};
use crate::resilience::{
    CircuitBreaker, CircuitOpenError, CircuitSnapshot, CircuitState, Permit, RetryPolicy,
    Transition,
};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::time::Instant;

/// Result of one wrapper invocation. Only `Success` is published.
#[derive(Debug)]
pub enum Outcome {
    Success(Vec<Article>),
    Suppressed(SuppressReason),
}

/// Why the fallback ran instead of the fetch.
#[derive(Debug, Clone, Error)]
pub enum SuppressReason {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
    #[error("{kind} failure after {attempts} attempt(s): {message}")]
    RetriesExhausted {
        attempts: u32,
        kind: FetchErrorKind,
        message: String,
    },
}

/// Wraps a [`FeedSource`] with bounded retry and a circuit breaker.
///
/// Cheap to share across overlapping cycles: the breaker sits behind a mutex
/// that is never held across an `.await`.
pub struct ResilientFetcher {
    source: Arc<dyn FeedSource>,
    retry: RetryPolicy,
    circuit: Mutex<CircuitBreaker>,
}

impl ResilientFetcher {
    pub fn new(source: Arc<dyn FeedSource>, retry: RetryPolicy, circuit: CircuitBreaker) -> Self {
        Self {
            source,
            retry,
            circuit: Mutex::new(circuit),
        }
    }

    pub fn feed_url(&self) -> &str {
        self.source.url()
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.lock_circuit().snapshot()
    }

    /// Runs one guarded fetch. Never fails: errors become [`Outcome::Suppressed`].
    ///
    /// # Behavior
    ///
    /// - An open circuit returns the fallback without touching the source
    /// - Failed attempts are retried per the [`RetryPolicy`]; the half-open trial gets one attempt
    /// - An invocation that exhausts its attempts counts as one circuit failure
    /// - Dropping the future mid-trial (timeout, panic, `select!`) reopens the circuit
    pub async fn invoke(&self) -> Outcome {
        let acquired = self.lock_circuit().try_acquire(Instant::now());
        let permit = match acquired {
            Ok((permit, transition)) => {
                self.log_transition(transition);
                permit
            }
            Err(e) => return self.fallback(SuppressReason::CircuitOpen(e)),
        };
        let guard = PermitGuard {
            fetcher: self,
            permit,
            settled: false,
        };

        // The half-open trial gets exactly one attempt
        let max_attempts = if permit.is_trial() {
            1
        } else {
            self.retry.max_attempts
        };

        let mut attempt = 0;
        let last_error = loop {
            attempt += 1;
            match self.source.fetch().await {
                Ok(articles) => {
                    guard.succeed();
                    return Outcome::Success(articles);
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        break e;
                    }
                    // An overlapping cycle may have opened the circuit meanwhile
                    if self.lock_circuit().state() == CircuitState::Open {
                        tracing::debug!(
                            feed = %self.source.url(),
                            "Circuit opened during retries, giving up"
                        );
                        break e;
                    }

                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        feed = %self.source.url(),
                        kind = %e.kind(),
                        error = %e,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        guard.fail();

        self.fallback(SuppressReason::RetriesExhausted {
            attempts: attempt,
            kind: last_error.kind(),
            message: last_error.to_string(),
        })
    }

    /// Records the reason and produces an empty cycle. Must not fail.
    fn fallback(&self, reason: SuppressReason) -> Outcome {
        let snapshot = self.circuit_snapshot();
        match &reason {
            SuppressReason::CircuitOpen(e) => {
                tracing::warn!(
                    feed = %self.source.url(),
                    circuit = %snapshot.state,
                    retry_in_ms = e.remaining.as_millis() as u64,
                    "Feed fetch suppressed: circuit open"
                );
            }
            SuppressReason::RetriesExhausted {
                attempts,
                kind,
                message,
            } => {
                tracing::warn!(
                    feed = %self.source.url(),
                    circuit = %snapshot.state,
                    consecutive_failures = snapshot.consecutive_failures,
                    kind = %kind,
                    attempts = attempts,
                    error = %message,
                    "Feed fetch suppressed: retries exhausted"
                );
            }
        }
        Outcome::Suppressed(reason)
    }

    fn log_transition(&self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        match to {
            CircuitState::Open => tracing::warn!(
                feed = %self.source.url(),
                from = %from,
                to = %to,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                feed = %self.source.url(),
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }
    }

    fn lock_circuit(&self) -> MutexGuard<'_, CircuitBreaker> {
        // Breaker state stays consistent across a panic in another holder
        self.circuit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Settles a permit exactly once.
///
/// A permit dropped without a recorded result releases its trial, so a
/// cancelled or panicked trial cannot leave the breaker stuck in `HalfOpen`.
struct PermitGuard<'a> {
    fetcher: &'a ResilientFetcher,
    permit: Permit,
    settled: bool,
}

impl PermitGuard<'_> {
    fn succeed(mut self) {
        self.settled = true;
        let transition = self
            .fetcher
            .lock_circuit()
            .record_success(self.permit, Instant::now());
        self.fetcher.log_transition(transition);
    }

    fn fail(mut self) {
        self.settled = true;
        let transition = self
            .fetcher
            .lock_circuit()
            .record_failure(self.permit, Instant::now());
        self.fetcher.log_transition(transition);
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let transition = self
            .fetcher
            .lock_circuit()
            .abandon_trial(self.permit, Instant::now());
        if transition.is_some() {
            tracing::warn!(
                feed = %self.fetcher.source.url(),
                "Half-open trial abandoned before completing"
            );
        }
        self.fetcher.log_transition(transition);
    }
}
