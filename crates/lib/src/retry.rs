//! Bounded retry schedules for the startup phases and the process supervisor.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step × attempt` after each failed attempt.
    Linear(Duration),
    /// `initial`, then multiplied by `factor` after each further failed attempt.
    Exponential { initial: Duration, factor: u32 },
}

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Session establishment: 3 attempts, 5s then 10s between them.
pub const CONNECT: RetryPolicy = RetryPolicy::linear(3, Duration::from_secs(5));

/// Channel resolution: 3 attempts, 3s then 6s between them.
pub const RESOLVE: RetryPolicy = RetryPolicy::linear(3, Duration::from_secs(3));

/// Whole-bridge restarts: 3 attempts, 10s then 20s between them.
pub const SUPERVISOR: RetryPolicy = RetryPolicy::exponential(3, Duration::from_secs(10), 2);

impl RetryPolicy {
    pub const fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear(step),
        }
    }

    pub const fn exponential(max_attempts: u32, initial: Duration, factor: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { initial, factor },
        }
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Delay to wait after failed attempt `attempt` (1-based); `None` once the budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || self.is_last(attempt) {
            return None;
        }
        let delay = match self.backoff {
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Exponential { initial, factor } => {
                initial.saturating_mul(factor.saturating_pow(attempt - 1))
            }
        };
        Some(delay)
    }
}
