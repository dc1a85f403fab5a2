//! Backoff computation and error classification (spec.md §4.1, §4.3).

use crate::channels::DeliveryError;
use notify_core::model::RetryPolicySpec;
use std::time::Duration;

/// The two classes a `DeliveryError` can fall into (spec.md §4.1
/// "Error classification"). Unknown errors are folded into `Transient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Permanent,
    Transient,
}

/// Classify a deliverer error per spec.md §4.1's table.
pub fn classify(err: &DeliveryError) -> ErrorClass {
    match err {
        DeliveryError::Http(status) => match status {
            400 | 401 | 403 | 404 | 410 | 422 => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        },
        DeliveryError::MalformedRecipient(_) => ErrorClass::Permanent,
        DeliveryError::NoDeliverer => ErrorClass::Permanent,
        DeliveryError::SanitizationFailed => ErrorClass::Permanent,
        DeliveryError::BreakerOpen(_) => ErrorClass::Transient,
        DeliveryError::Connection(_) | DeliveryError::Timeout | DeliveryError::Other(_) => {
            ErrorClass::Transient
        }
    }
}

/// A pure value object wrapping a request's retry policy (spec.md §4.3).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy(pub RetryPolicySpec);

impl RetryPolicy {
    pub fn new(spec: RetryPolicySpec) -> Self {
        Self(spec)
    }

    /// `backoff(n) = min(maxBackoffSeconds, initialBackoffSeconds *
    /// backoffMultiplier^(n-1))` (spec.md §4.1), `n` = attempts already made.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        Duration::from_secs(self.0.backoff_seconds(attempts_made))
    }

    /// `shouldRetry(classification, attempts)`: retry iff the error is
    /// transient and the channel hasn't exhausted its attempt budget
    /// (spec.md §4.3). `ChannelState::has_retry_budget` re-derives the same
    /// exhaustion check from persisted status on the next reconcile; this is
    /// the immediate decision made right after a delivery attempt completes.
    pub fn should_retry(&self, class: ErrorClass, attempts_made: u32) -> bool {
        class == ErrorClass::Transient && attempts_made < self.0.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_4xx_as_permanent() {
        assert_eq!(classify(&DeliveryError::Http(401)), ErrorClass::Permanent);
        assert_eq!(classify(&DeliveryError::Http(404)), ErrorClass::Permanent);
    }

    #[test]
    fn classifies_5xx_and_429_as_transient() {
        assert_eq!(classify(&DeliveryError::Http(503)), ErrorClass::Transient);
        assert_eq!(classify(&DeliveryError::Http(429)), ErrorClass::Transient);
    }

    #[test]
    fn breaker_open_counts_as_transient() {
        assert_eq!(
            classify(&DeliveryError::BreakerOpen("x".into())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        let policy = RetryPolicy::new(RetryPolicySpec {
            max_attempts: 5,
            initial_backoff_seconds: 1,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 10,
        });
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::new(RetryPolicySpec {
            max_attempts: 3,
            ..RetryPolicySpec::default()
        });
        assert!(policy.should_retry(ErrorClass::Transient, 2));
        assert!(!policy.should_retry(ErrorClass::Transient, 3));
        assert!(!policy.should_retry(ErrorClass::Permanent, 0));
    }
}
