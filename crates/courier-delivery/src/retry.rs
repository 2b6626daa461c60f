//! Retry scheduling with capped exponential backoff and jitter.
//!
//! Attempt numbers start at 0 for the initial delivery, so a webhook with
//! `max_retries = N` gets attempts `0..=N`. After attempt `k` fails, the
//! successor is due `min(base * 2^k, max_delay)` later, plus non-negative
//! jitter. Jitter only ever lengthens the delay, so the scheduled time is
//! never earlier than the computed backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy shared by every webhook; the retry budget itself comes from
/// each webhook's `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the initial attempt fails.
    pub base_delay: Duration,

    /// Upper bound on the computed delay, jitter included.
    pub max_delay: Duration,

    /// Extra random delay as a fraction of the computed delay (0.0 to 1.0).
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,

    /// Upper bound on a server-provided `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.2,
            backoff_strategy: BackoffStrategy::Exponential,
            max_retry_after: Duration::from_secs(3600),
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles with each attempt.
    Exponential,
    /// Delay grows by `base_delay` with each attempt.
    Linear,
}

impl RetryPolicy {
    /// Backoff after attempt `attempt_number` fails, before jitter.
    pub fn backoff(&self, attempt_number: u32) -> Duration {
        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt_number.saturating_add(1)),
            BackoffStrategy::Exponential => {
                let multiplier = 2_u32.saturating_pow(attempt_number.min(31));
                self.base_delay.saturating_mul(multiplier)
            },
        };

        delay.min(self.max_delay)
    }

    /// Backoff with jitter applied, clamped to `max_delay`.
    ///
    /// Never shorter than [`RetryPolicy::backoff`].
    pub fn jittered_backoff(&self, attempt_number: u32) -> Duration {
        let delay = self.backoff(attempt_number);
        apply_jitter(delay, self.jitter_factor).min(self.max_delay).max(delay)
    }
}

/// Everything needed to decide what follows a failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    /// Number of the attempt that just failed (0-based).
    pub attempt_number: u32,
    /// The webhook's retry budget.
    pub max_retries: u32,
    /// Why the attempt failed.
    pub error: &'a DeliveryError,
    /// When the attempt completed.
    pub failed_at: DateTime<Utc>,
    /// Retry policy to apply.
    pub policy: &'a RetryPolicy,
}

/// What happens after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Enqueue a successor due at `next_attempt_at`.
    Retry {
        /// When the successor becomes due
        next_attempt_at: DateTime<Utc>,
    },
    /// End the chain.
    GiveUp {
        /// Why no successor is scheduled
        reason: String,
    },
}

impl<'a> RetryContext<'a> {
    /// Creates a new retry context for a failed delivery.
    pub fn new(
        attempt_number: u32,
        max_retries: u32,
        error: &'a DeliveryError,
        failed_at: DateTime<Utc>,
        policy: &'a RetryPolicy,
    ) -> Self {
        Self { attempt_number, max_retries, error, failed_at, policy }
    }

    /// Decides whether the chain continues and when.
    pub fn decide_retry(&self) -> RetryDecision {
        if !self.error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {}", self.error) };
        }

        if self.attempt_number >= self.max_retries {
            return RetryDecision::GiveUp {
                reason: format!("retries exhausted after {} attempts", self.attempt_number + 1),
            };
        }

        let delay = self.calculate_delay();
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp { reason: "retry delay out of range".to_string() };
        };

        RetryDecision::Retry { next_attempt_at: self.failed_at + chrono_delay }
    }

    /// Jittered backoff, stretched to honour a capped `Retry-After`.
    fn calculate_delay(&self) -> Duration {
        let delay = self.policy.jittered_backoff(self.attempt_number);

        match self.error.retry_after_seconds() {
            Some(seconds) => delay.max(Duration::from_secs(seconds).min(self.policy.max_retry_after)),
            None => delay,
        }
    }
}

/// Adds a random delay in `[0, duration * jitter_factor]`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let jitter_range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(0.0..=jitter_range);

    duration.saturating_add(Duration::from_secs_f64(offset))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn exponential_backoff_doubles_from_attempt_zero() {
        let policy = no_jitter();

        let delays: Vec<_> = (0..5).map(|n| policy.backoff(n)).collect();

        assert_eq!(delays, [1, 2, 4, 8, 16].map(Duration::from_secs));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = no_jitter();

        assert_eq!(policy.backoff(6), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn linear_and_fixed_strategies() {
        let linear = RetryPolicy { backoff_strategy: BackoffStrategy::Linear, ..no_jitter() };
        let fixed = RetryPolicy { backoff_strategy: BackoffStrategy::Fixed, ..no_jitter() };

        assert_eq!(linear.backoff(0), Duration::from_secs(1));
        assert_eq!(linear.backoff(3), Duration::from_secs(4));
        assert_eq!(fixed.backoff(0), Duration::from_secs(1));
        assert_eq!(fixed.backoff(9), Duration::from_secs(1));
    }

    #[test]
    fn retries_until_budget_is_spent() {
        let policy = no_jitter();
        let error = DeliveryError::timeout(30);
        let failed_at = Utc::now();

        let decision = RetryContext::new(2, 3, &error, failed_at, &policy).decide_retry();
        assert_eq!(
            decision,
            RetryDecision::Retry { next_attempt_at: failed_at + chrono::Duration::seconds(4) }
        );

        match RetryContext::new(3, 3, &error, failed_at, &policy).decide_retry() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("exhausted after 4 attempts")),
            RetryDecision::Retry { .. } => unreachable!("budget of 3 retries is spent at attempt 3"),
        }
    }

    #[test]
    fn zero_retries_never_retry() {
        let policy = no_jitter();
        let error = DeliveryError::server_error(500, "");

        let decision = RetryContext::new(0, 0, &error, Utc::now(), &policy).decide_retry();
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn permanent_errors_give_up_immediately() {
        let policy = no_jitter();
        let error = DeliveryError::client_error(404, "not found");

        match RetryContext::new(0, 5, &error, Utc::now(), &policy).decide_retry() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("non-retryable")),
            RetryDecision::Retry { .. } => unreachable!("404 is permanent"),
        }
    }

    #[test]
    fn retry_after_extends_but_never_shortens_backoff() {
        let policy = no_jitter();
        let failed_at = Utc::now();

        let long = DeliveryError::rate_limited(Some(30));
        let decision = RetryContext::new(0, 5, &long, failed_at, &policy).decide_retry();
        assert_eq!(
            decision,
            RetryDecision::Retry { next_attempt_at: failed_at + chrono::Duration::seconds(30) }
        );

        let short = DeliveryError::rate_limited(Some(1));
        let decision = RetryContext::new(4, 5, &short, failed_at, &policy).decide_retry();
        assert_eq!(
            decision,
            RetryDecision::Retry { next_attempt_at: failed_at + chrono::Duration::seconds(16) }
        );
    }

    #[test]
    fn retry_after_is_capped() {
        let policy = RetryPolicy { max_retry_after: Duration::from_secs(120), ..no_jitter() };
        let failed_at = Utc::now();
        let error = DeliveryError::rate_limited(Some(86_400));

        let decision = RetryContext::new(0, 5, &error, failed_at, &policy).decide_retry();
        assert_eq!(
            decision,
            RetryDecision::Retry { next_attempt_at: failed_at + chrono::Duration::seconds(120) }
        );
    }

    #[test]
    fn jitter_varies_delay_within_bounds() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.5,
            ..RetryPolicy::default()
        };

        let seen: std::collections::HashSet<_> =
            (0..20).map(|_| policy.jittered_backoff(0).as_millis()).collect();

        assert!(seen.len() > 1, "jitter should create variation");
        for delay_ms in seen {
            assert!((10_000..=15_000).contains(&delay_ms), "delay out of range: {delay_ms}ms");
        }
    }

    proptest! {
        #[test]
        fn next_retry_is_never_before_backoff(
            attempt in 0u32..40,
            base_ms in 1u64..60_000,
            max_s in 1u64..7_200,
            jitter in 0.0f64..1.0,
            retry_after in proptest::option::of(0u64..10_000),
        ) {
            let policy = RetryPolicy {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(max_s),
                jitter_factor: jitter,
                ..RetryPolicy::default()
            };
            let error = DeliveryError::rate_limited(retry_after);
            let failed_at = Utc::now();

            match RetryContext::new(attempt, attempt + 1, &error, failed_at, &policy).decide_retry() {
                RetryDecision::Retry { next_attempt_at } => {
                    let floor = failed_at + chrono::Duration::from_std(policy.backoff(attempt)).unwrap();
                    prop_assert!(next_attempt_at >= floor);
                },
                RetryDecision::GiveUp { reason } => prop_assert!(false, "unexpected give up: {}", reason),
            }
        }

        #[test]
        fn jittered_backoff_stays_within_cap(attempt in 0u32..64, jitter in 0.0f64..1.0) {
            let policy = RetryPolicy { jitter_factor: jitter, ..RetryPolicy::default() };
            let delay = policy.jittered_backoff(attempt);

            prop_assert!(delay >= policy.backoff(attempt));
            prop_assert!(delay <= policy.max_delay);
        }
    }
}
