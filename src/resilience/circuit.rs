use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are short-circuited to the fallback.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failed invocations that open the circuit.
    pub failure_threshold: u32,
    /// Failures older than this (measured from the first failure of the
    /// current streak) no longer count toward the threshold.
    pub window: Duration,
    /// Time spent `Open` before a trial call is allowed.
    pub cooldown: Duration,
}

/// Rejection returned while the circuit refuses calls.
#[derive(Debug, Clone, Error)]
#[error("Circuit {state}: call not permitted (retry in {remaining:?})")]
pub struct CircuitOpenError {
    pub state: CircuitState,
    /// Time left until a trial is allowed; zero while a trial is in flight.
    pub remaining: Duration,
}

/// Permission to make one invocation, handed back with its result.
///
/// Carries the breaker generation at issue time. Every state change bumps the
/// generation, so a result from an overlapping invocation that started before
/// the change is ignored instead of overriding the newer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    trial: bool,
    generation: u64,
}

impl Permit {
    /// True for the single `HalfOpen` trial, which must not be retried.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Point-in-time view of the breaker, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_state_change: Instant,
}

/// Circuit breaker state for one feed.
///
/// Holds no lock itself; the owner wraps it in a mutex. All methods take
/// `now` explicitly so transitions can be driven from tests.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    state: CircuitState,
    consecutive_failures: u32,
    streak_started: Option<Instant>,
    last_state_change: Instant,
    trial_in_flight: bool,
    generation: u64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig, now: Instant) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            streak_started: None,
            last_state_change: now,
            trial_in_flight: false,
            generation: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_state_change: self.last_state_change,
        }
    }

    /// Asks permission to call the upstream.
    ///
    /// An `Open` circuit whose cool-down has elapsed moves to `HalfOpen` here
    /// and hands out the trial permit.
    pub fn try_acquire(
        &mut self,
        now: Instant,
    ) -> Result<(Permit, Option<Transition>), CircuitOpenError> {
        match self.state {
            CircuitState::Closed => Ok((self.permit(false), None)),
            CircuitState::Open => {
                let elapsed = now.saturating_duration_since(self.last_state_change);
                if elapsed >= self.config.cooldown {
                    let transition = self.transition(CircuitState::HalfOpen, now);
                    self.trial_in_flight = true;
                    Ok((self.permit(true), transition))
                } else {
                    Err(CircuitOpenError {
                        state: CircuitState::Open,
                        remaining: self.config.cooldown - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Err(CircuitOpenError {
                        state: CircuitState::HalfOpen,
                        remaining: Duration::ZERO,
                    })
                } else {
                    self.trial_in_flight = true;
                    Ok((self.permit(true), None))
                }
            }
        }
    }

    /// Records a successful call made under `permit`.
    ///
    /// Clears the failure streak while `Closed` and closes the circuit when
    /// the permit is the half-open trial. Permits issued before the last
    /// transition are ignored.
    pub fn record_success(&mut self, permit: Permit, now: Instant) -> Option<Transition> {
        if permit.generation != self.generation {
            return None;
        }
        match (self.state, permit.trial) {
            (CircuitState::Closed, false) => {
                self.reset_failures();
                None
            }
            (CircuitState::HalfOpen, true) => {
                self.trial_in_flight = false;
                self.reset_failures();
                self.transition(CircuitState::Closed, now)
            }
            _ => None,
        }
    }

    /// Records a failed call made under `permit`.
    ///
    /// While `Closed`, the failure joins the current streak if the streak
    /// started within the configured window, otherwise it starts a new one.
    /// Reaching the threshold opens the circuit. A failed trial reopens it and
    /// restarts the cool-down. Stale permits are ignored.
    pub fn record_failure(&mut self, permit: Permit, now: Instant) -> Option<Transition> {
        if permit.generation != self.generation {
            return None;
        }
        match (self.state, permit.trial) {
            (CircuitState::Closed, false) => {
                let in_window = self.streak_started.is_some_and(|start| {
                    now.saturating_duration_since(start) <= self.config.window
                });
                if in_window {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                } else {
                    self.streak_started = Some(now);
                    self.consecutive_failures = 1;
                }

                if self.consecutive_failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Open, now)
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, true) => {
                self.trial_in_flight = false;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.transition(CircuitState::Open, now)
            }
            _ => None,
        }
    }

    /// Releases a trial permit whose call never reported a result.
    ///
    /// The circuit goes back to `Open` with a fresh cool-down, so the next
    /// trial is handed out once it elapses. Does nothing for normal permits,
    /// stale permits, or a breaker that is no longer `HalfOpen`.
    pub fn abandon_trial(&mut self, permit: Permit, now: Instant) -> Option<Transition> {
        if !permit.trial || permit.generation != self.generation {
            return None;
        }
        if self.state != CircuitState::HalfOpen {
            return None;
        }
        self.trial_in_flight = false;
        self.transition(CircuitState::Open, now)
    }

    fn permit(&self, trial: bool) -> Permit {
        Permit {
            trial,
            generation: self.generation,
        }
    }

    fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.streak_started = None;
    }

    fn transition(&mut self, to: CircuitState, now: Instant) -> Option<Transition> {
        let from = self.state;
        self.state = to;
        self.last_state_change = now;
        self.generation = self.generation.wrapping_add(1);
        (from != to).then_some(Transition { from, to })
    }
}
