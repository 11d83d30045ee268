//! Bounded retry for version-guarded writes.
//!
//! Conflicts back off exponentially with full jitter so that racing writers
//! spread out instead of colliding again on the next attempt.

use std::fmt::Display;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Attempts actually made; a zero budget still runs once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound of the wait after the `attempt`-th failure (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Random wait in `[0, ceiling(attempt)]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_micros();
        let ceiling = u64::try_from(ceiling).unwrap_or(u64::MAX);
        Duration::from_micros(rand::rng().random_range(0..=ceiling))
    }
}

/// Run `attempt` until it succeeds, fails with a non-conflict error, or the
/// policy runs out of attempts. The last conflict is returned in that case.
pub async fn retry_on_conflict<T, E, F>(
    policy: &RetryPolicy,
    operation: &str,
    is_conflict: impl Fn(&E) -> bool,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let max_attempts = policy.attempts();
    let mut tries = 0;

    loop {
        let err = match attempt() {
            Ok(value) => return Ok(value),
            Err(err) if !is_conflict(&err) => return Err(err),
            Err(err) => err,
        };

        tries += 1;
        if tries >= max_attempts {
            warn!(operation, attempts = tries, error = %err, "giving up after repeated conflicts");
            return Err(err);
        }

        let delay = policy.backoff(tries - 1);
        debug!(operation, attempt = tries, delay_us = delay.as_micros() as u64, "conflict, retrying");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Conflict,
        Fatal,
    }

    impl Display for Outcome {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_micros(10),
            max_delay: Duration::from_micros(50),
        }
    }

    #[test]
    fn ceiling_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(0), Duration::from_millis(5));
        assert_eq!(policy.ceiling(1), Duration::from_millis(10));
        assert_eq!(policy.ceiling(3), Duration::from_millis(40));
        assert_eq!(policy.ceiling(5), Duration::from_millis(100));
        assert_eq!(policy.ceiling(64), Duration::from_millis(100));
    }

    #[test]
    fn backoff_stays_under_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 0..8 {
            assert!(policy.backoff(attempt) <= policy.ceiling(attempt));
        }
    }

    #[tokio::test]
    async fn succeeds_after_conflicts() {
        let mut calls = 0;
        let result = retry_on_conflict(&fast(), "test", |e| *e == Outcome::Conflict, || {
            calls += 1;
            if calls < 3 { Err(Outcome::Conflict) } else { Ok(calls) }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_conflict(&fast(), "test", |e| *e == Outcome::Conflict, || {
            calls += 1;
            Err(Outcome::Conflict)
        })
        .await;
        assert_eq!(result, Err(Outcome::Conflict));
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn zero_budget_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..fast()
        };
        let mut calls = 0;
        let result: Result<(), _> = retry_on_conflict(&policy, "test", |e| *e == Outcome::Conflict, || {
            calls += 1;
            Err(Outcome::Conflict)
        })
        .await;
        assert_eq!(result, Err(Outcome::Conflict));
        assert_eq!(calls, 1);
        assert_eq!(policy.attempts(), calls);
    }

    #[tokio::test]
    async fn does_not_retry_other_errors() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_conflict(&fast(), "test", |e| *e == Outcome::Conflict, || {
            calls += 1;
            Err(Outcome::Fatal)
        })
        .await;
        assert_eq!(result, Err(Outcome::Fatal));
        assert_eq!(calls, 1);
    }
}
