//! Per-node retry policy
//!
//! An explicit, testable policy object injected into the orchestrator per
//! node. Only transient errors consume the budget; everything else is
//! terminal on the first failure.

use std::time::Duration;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`: base, 2x base, 4x base, ...
    Exponential { base: Duration },
}

impl Backoff {
    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor)
            }
        }
    }
}

/// Retry budget for one task-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (a budget of 3 means at most two
    /// retries).
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Default policy for fetch nodes: 3 attempts, exponential backoff from
    /// one second.
    pub fn fetch_default() -> Self {
        Self::fetch(3)
    }

    /// Fetch policy with an explicit attempt budget.
    pub fn fetch(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
            },
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts have run.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay(1), backoff.delay(5));
    }

    #[test]
    fn budget_counts_attempts_not_retries() {
        let policy = RetryPolicy::fetch(3);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }
}
