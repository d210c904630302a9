// Cycle interval backoff. Independent of the circuit breaker.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffState {
    Normal,
    Backoff { interval: Duration, success_streak: u32 },
}

#[derive(Debug, Clone)]
pub struct IntervalBackoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    reset_after_successes: u32,
    state: BackoffState,
}

impl IntervalBackoff {
    pub fn new(base: Duration, max: Duration, multiplier: f64, reset_after_successes: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            multiplier: multiplier.max(1.0),
            reset_after_successes: reset_after_successes.max(1),
            state: BackoffState::Normal,
        }
    }

    pub fn state(&self) -> BackoffState {
        self.state
    }

    /// Delay before the next cycle.
    pub fn interval(&self) -> Duration {
        match self.state {
            BackoffState::Normal => self.base,
            BackoffState::Backoff { interval, .. } => interval,
        }
    }

    /// Feed the outcome of a finished cycle. Returns the interval to wait next.
    pub fn on_cycle(&mut self, success: bool) -> Duration {
        self.state = match (self.state, success) {
            (BackoffState::Normal, true) => BackoffState::Normal,
            (current, false) => {
                let grown = self.interval().mul_f64(self.multiplier).min(self.max);
                if matches!(current, BackoffState::Normal) {
                    tracing::info!(interval_secs = grown.as_secs_f64(), "collection failing, backing off");
                }
                BackoffState::Backoff {
                    interval: grown,
                    success_streak: 0,
                }
            }
            (BackoffState::Backoff { interval, success_streak }, true) => {
                let streak = success_streak + 1;
                if streak >= self.reset_after_successes {
                    tracing::info!(interval_secs = self.base.as_secs_f64(), "collection recovered, interval reset");
                    BackoffState::Normal
                } else {
                    BackoffState::Backoff {
                        interval,
                        success_streak: streak,
                    }
                }
            }
        };
        self.interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> IntervalBackoff {
        IntervalBackoff::new(Duration::from_secs(30), Duration::from_secs(300), 2.0, 3)
    }

    #[test]
    fn failures_grow_until_cap() {
        let mut b = backoff();
        assert_eq!(b.on_cycle(false), Duration::from_secs(60));
        assert_eq!(b.on_cycle(false), Duration::from_secs(120));
        assert_eq!(b.on_cycle(false), Duration::from_secs(240));
        assert_eq!(b.on_cycle(false), Duration::from_secs(300));
        assert_eq!(b.on_cycle(false), Duration::from_secs(300));
    }

    #[test]
    fn resets_after_success_streak() {
        let mut b = backoff();
        b.on_cycle(false);
        assert_eq!(b.on_cycle(true), Duration::from_secs(60));
        assert_eq!(b.on_cycle(true), Duration::from_secs(60));
        assert_eq!(b.on_cycle(true), Duration::from_secs(30));
        assert_eq!(b.state(), BackoffState::Normal);
    }

    #[test]
    fn failure_breaks_the_streak() {
        let mut b = backoff();
        b.on_cycle(false);
        b.on_cycle(true);
        b.on_cycle(true);
        assert_eq!(b.on_cycle(false), Duration::from_secs(120));
        assert_eq!(
            b.state(),
            BackoffState::Backoff {
                interval: Duration::from_secs(120),
                success_streak: 0
            }
        );
    }
}
