//! Fixed-rate trigger for a [`Pipeline`].
//!
//! Ticks are measured start-to-start. Each cycle runs on its own task, so a
//! slow cycle does not delay the next tick and cycles may overlap unless
//! overlap prevention is enabled.

use crate::pipeline::Pipeline;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Tick counts for one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Cycles started.
    pub fired: usize,
    /// Ticks skipped because the previous cycle was still running.
    pub skipped: usize,
}

/// Fixed-rate trigger for one [`Pipeline`].
///
/// Ticks are measured from the start of each cycle, not its end. By default a
/// slow cycle may overlap the next one.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    prevent_overlap: bool,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            prevent_overlap: false,
        }
    }

    /// Skip a tick instead of starting a second concurrent cycle.
    pub fn prevent_overlap(mut self, enabled: bool) -> Self {
        self.prevent_overlap = enabled;
        self
    }

    /// Fires cycles until `shutdown` resolves, then waits for in-flight cycles.
    ///
    /// # Behavior
    ///
    /// - The first cycle starts immediately
    /// - Each cycle runs in its own task, so a panic is logged and the schedule continues
    /// - With overlap prevention on, a tick that finds a cycle running is skipped
    /// - Ticks missed while the runtime was stalled are skipped, not replayed
    pub async fn run<F>(self, shutdown: F) -> SchedulerStats
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        // After a stall (e.g. suspended host) resume the cadence instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let running = Arc::new(Mutex::new(()));
        let mut in_flight = JoinSet::new();
        let mut stats = SchedulerStats::default();
        tokio::pin!(shutdown);

        tracing::info!(
            feed = %self.pipeline.feed_url(),
            interval_secs = self.interval.as_secs(),
            prevent_overlap = self.prevent_overlap,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                _ = ticker.tick() => {
                    let guard = if self.prevent_overlap {
                        match Arc::clone(&running).try_lock_owned() {
                            Ok(guard) => Some(guard),
                            Err(_) => {
                                stats.skipped += 1;
                                tracing::info!(
                                    feed = %self.pipeline.feed_url(),
                                    "Previous cycle still running, skipping tick"
                                );
                                continue;
                            }
                        }
                    } else {
                        None
                    };

                    stats.fired += 1;
                    let pipeline = Arc::clone(&self.pipeline);
                    in_flight.spawn(async move {
                        let _guard = guard;
                        pipeline.run_cycle().await;
                    });
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join_result(joined);
                }
            }
        }

        tracing::info!(
            feed = %self.pipeline.feed_url(),
            in_flight = in_flight.len(),
            "Scheduler stopping, waiting for running cycles"
        );
        while let Some(joined) = in_flight.join_next().await {
            log_join_result(joined);
        }

        stats
    }
}

fn log_join_result(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Poll cycle task failed");
    }
}
