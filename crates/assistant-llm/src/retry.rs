use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::StreamFailure;

/// Exponential retry policy shared by all provider calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Exponential multiplier per retry step.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for any computed or provider-requested delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Whether `429` responses are retried internally. Off by default: rate
    /// limits are surfaced so the caller can show a countdown.
    #[serde(default)]
    pub retry_rate_limited: bool,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-issue the whole request after the delay.
    RetryAfter(Duration),
    /// Surface the failure to the caller.
    GiveUp,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy {
    /// Three attempts with 1s, 2s backoff between them.
    pub fn standard() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_rate_limited: false,
        }
    }

    /// A single attempt, never retried.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::standard()
        }
    }

    pub fn exponential(max_attempts: u32, initial_backoff_ms: u64, backoff_factor: f64) -> Self {
        let initial = if initial_backoff_ms == 0 {
            default_initial_backoff_ms()
        } else {
            initial_backoff_ms
        };
        let factor = if backoff_factor <= 0.0 {
            default_backoff_factor()
        } else {
            backoff_factor
        };
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff_ms: initial,
            backoff_factor: factor,
            ..Self::standard()
        }
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms.max(1);
        self
    }

    pub fn with_rate_limit_retry(mut self, enabled: bool) -> Self {
        self.retry_rate_limited = enabled;
        self
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn can_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before retry number `retries_done` (0-based).
    pub fn backoff_duration(&self, retries_done: u32) -> Duration {
        let exp = self.backoff_factor.powi(retries_done as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round() as u64;
        Duration::from_millis(base.min(self.cap_ms()))
    }

    /// Decides whether `failure` from attempt number `attempts_made` (1-based)
    /// should be retried.
    pub fn decide(&self, failure: &StreamFailure, attempts_made: u32) -> RetryDecision {
        if !self.can_retry(attempts_made) {
            return RetryDecision::GiveUp;
        }
        let retries_done = attempts_made.saturating_sub(1);
        match failure {
            StreamFailure::RateLimited { retry_after } if self.retry_rate_limited => {
                let delay = retry_after
                    .map(|secs| Duration::from_secs(secs).min(Duration::from_millis(self.cap_ms())))
                    .unwrap_or_else(|| self.backoff_duration(retries_done));
                RetryDecision::RetryAfter(delay)
            }
            failure if failure.is_transient() => {
                RetryDecision::RetryAfter(self.backoff_duration(retries_done))
            }
            _ => RetryDecision::GiveUp,
        }
    }

    fn cap_ms(&self) -> u64 {
        self.max_backoff_ms.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_doubles_from_one_second() {
        let p = RetryPolicy::standard();
        assert_eq!(p.backoff_duration(0), Duration::from_secs(1));
        assert_eq!(p.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(p.backoff_duration(2), Duration::from_secs(4));
    }

    #[test]
    fn exponential_policy_grows_with_cap() {
        let p = RetryPolicy::exponential(4, 100, 2.0).with_max_backoff_ms(250);
        assert_eq!(p.backoff_duration(0).as_millis(), 100);
        assert_eq!(p.backoff_duration(1).as_millis(), 200);
        assert_eq!(p.backoff_duration(2).as_millis(), 250);
    }

    #[test]
    fn transient_failures_retry_until_attempts_exhausted() {
        let p = RetryPolicy::standard();
        let failure = StreamFailure::Network("reset".into());
        assert_eq!(
            p.decide(&failure, 1),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            p.decide(&failure, 2),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(p.decide(&failure, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn permanent_failures_surface_immediately() {
        let p = RetryPolicy::standard();
        for failure in [
            StreamFailure::Cancelled,
            StreamFailure::AuthenticationFailed,
            StreamFailure::InvalidConfiguration("no url".into()),
            StreamFailure::Provider {
                status: 422,
                message: "bad request".into(),
            },
        ] {
            assert_eq!(p.decide(&failure, 1), RetryDecision::GiveUp, "{failure:?}");
        }
    }

    #[test]
    fn rate_limits_are_caller_paced_by_default() {
        let failure = StreamFailure::RateLimited {
            retry_after: Some(60),
        };
        assert_eq!(
            RetryPolicy::standard().decide(&failure, 1),
            RetryDecision::GiveUp
        );

        let opted_in = RetryPolicy::standard()
            .with_rate_limit_retry(true)
            .with_max_backoff_ms(10_000);
        assert_eq!(
            opted_in.decide(&failure, 1),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            opted_in.decide(&StreamFailure::RateLimited { retry_after: None }, 2),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn none_policy_never_retries() {
        let p = RetryPolicy::none();
        assert!(!p.can_retry(1));
        assert_eq!(p.decide(&StreamFailure::Timeout, 1), RetryDecision::GiveUp);
    }
}
