// Fleet-wide circuit breaker: Closed -> Open -> HalfOpen -> Closed.
// Time is passed in so transitions can be driven deterministically.

use serde::Serialize;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Polling suspended until the cooldown has elapsed.
    Open { opened_at: Instant },
    /// Exactly one trial cycle is allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// What the scheduler may do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allow,
    /// Run one trial cycle, then report it with `finish_trial`.
    Trial,
    Deny { remaining: Duration },
}

/// Snapshot for logs and the status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub times_opened: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
    times_opened: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            times_opened: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state.as_str(),
            consecutive_failures: self.consecutive_failures,
            times_opened: self.times_opened,
        }
    }

    /// Asks whether a cycle may run. An Open breaker whose cooldown elapsed moves to HalfOpen.
    pub fn permission(&mut self, now: Instant) -> Permission {
        match self.state {
            CircuitState::Closed => Permission::Allow,
            CircuitState::HalfOpen => Permission::Trial,
            CircuitState::Open { opened_at } => {
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.cooldown {
                    self.state = CircuitState::HalfOpen;
                    tracing::info!(breaker_state = "half_open", "circuit breaker cooldown elapsed, probing");
                    Permission::Trial
                } else {
                    Permission::Deny {
                        remaining: self.cooldown - elapsed,
                    }
                }
            }
        }
    }

    /// A single poll succeeded. Only meaningful while Closed.
    pub fn record_success(&mut self) {
        if self.state == CircuitState::Closed {
            self.consecutive_failures = 0;
        }
    }

    /// A single network failure. Opens the breaker when the consecutive count reaches the threshold.
    /// Returns true when this call opened it.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        if self.state != CircuitState::Closed {
            return false;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold {
            self.open(now);
            return true;
        }
        false
    }

    /// Outcome of the HalfOpen trial cycle.
    pub fn finish_trial(&mut self, any_success: bool, now: Instant) {
        if self.state != CircuitState::HalfOpen {
            return;
        }
        if any_success {
            self.state = CircuitState::Closed;
            self.consecutive_failures = 0;
            tracing::info!(breaker_state = "closed", "circuit breaker closed after successful trial cycle");
        } else {
            self.open(now);
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open { opened_at: now };
        self.times_opened += 1;
        tracing::warn!(
            breaker_state = "open",
            consecutive_failures = self.consecutive_failures,
            cooldown_secs = self.cooldown.as_secs(),
            "circuit breaker opened, polling suspended"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    #[test]
    fn opens_exactly_at_threshold() {
        let now = Instant::now();
        let mut b = CircuitBreaker::new(10, COOLDOWN);
        for i in 1..10 {
            assert!(!b.record_failure(now), "opened early at {}", i);
            assert_eq!(b.state(), CircuitState::Closed);
        }
        assert!(b.record_failure(now));
        assert!(matches!(b.state(), CircuitState::Open { .. }));
    }

    #[test]
    fn success_resets_the_count() {
        let now = Instant::now();
        let mut b = CircuitBreaker::new(3, COOLDOWN);
        b.record_failure(now);
        b.record_failure(now);
        b.record_success();
        assert_eq!(b.consecutive_failures(), 0);
        b.record_failure(now);
        b.record_failure(now);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn open_denies_until_cooldown_then_allows_a_trial() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(1, COOLDOWN);
        b.record_failure(t0);
        match b.permission(t0 + Duration::from_secs(299)) {
            Permission::Deny { remaining } => assert_eq!(remaining, Duration::from_secs(1)),
            other => panic!("expected deny, got {:?}", other),
        }
        // Outcomes while open are ignored.
        b.record_success();
        assert!(matches!(b.state(), CircuitState::Open { .. }));
        assert_eq!(b.permission(t0 + COOLDOWN), Permission::Trial);
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn trial_success_closes_failure_reopens() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(1, COOLDOWN);
        b.record_failure(t0);
        b.permission(t0 + COOLDOWN);
        b.finish_trial(false, t0 + COOLDOWN);
        assert_eq!(
            b.state(),
            CircuitState::Open {
                opened_at: t0 + COOLDOWN
            }
        );
        assert!(matches!(
            b.permission(t0 + COOLDOWN + Duration::from_secs(10)),
            Permission::Deny { .. }
        ));
        b.permission(t0 + COOLDOWN * 2);
        b.finish_trial(true, t0 + COOLDOWN * 2);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().times_opened, 2);
    }
}
