// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! A component-agnostic retry executor (§4.15).
//!
//! Retried attempts never themselves create separate status-history entries
//! — only the step's single success or final failure does; callers are
//! responsible for emitting exactly one outcome into the orchestrator's
//! history regardless of how many attempts [`retry`] made internally.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff shape selected by error category (§4.4, §4.15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Non-retryable; `retry` returns the first error immediately.
    None,
    /// Exponential base delay plus random jitter (throttling/capacity).
    Jittered,
    /// Delay grows linearly with attempt number (network timeout).
    Linear,
    /// Delay doubles each attempt (server error).
    Exponential,
}

/// Bounded-attempt budget and backoff shape for one error category.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Which delay curve to use between attempts.
    pub strategy: Backoff,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay used by every non-`None` strategy.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// No retries: the first failure is final.
    #[must_use]
    pub fn none() -> Self {
        Self {
            strategy: Backoff::None,
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Throttling / rate-limit errors: jittered exponential, up to 5 attempts.
    #[must_use]
    pub fn capacity() -> Self {
        Self {
            strategy: Backoff::Jittered,
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
        }
    }

    /// Network timeouts: linear backoff, up to 2 attempts.
    #[must_use]
    pub fn network() -> Self {
        Self {
            strategy: Backoff::Linear,
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Unclassified server errors: exponential backoff, up to 3 attempts.
    #[must_use]
    pub fn server() -> Self {
        Self {
            strategy: Backoff::Exponential,
            max_attempts: 3,
            base_delay: Duration::from_millis(300),
        }
    }

    /// Bound `max_attempts` to `limit`, keeping the same strategy and delay.
    #[must_use]
    pub fn capped_at(mut self, limit: u32) -> Self {
        self.max_attempts = self.max_attempts.min(limit.max(1));
        self
    }

    /// Delay to sleep before the attempt numbered `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            Backoff::None => Duration::ZERO,
            Backoff::Linear => self.base_delay * attempt,
            Backoff::Exponential => self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1)),
            Backoff::Jittered => {
                let exp = self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
                let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis().max(1) as u64);
                exp + Duration::from_millis(jitter_ms)
            }
        }
    }
}

/// Errors [`retry`] can classify as worth another attempt.
pub trait Retryable {
    /// Whether this error should be retried given attempts remain.
    fn is_retryable(&self) -> bool;
}

impl Retryable for vv_error::WorkflowError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Run `attempt_fn` under `policy`, retrying on [`Retryable::is_retryable`]
/// errors until success, a non-retryable error, or attempt exhaustion.
///
/// `attempt_fn` receives the 1-based attempt number so it can log or tag
/// request ids consistently.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut attempt_fn: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && err.is_retryable() => {
                tracing::event!(
                    tracing::Level::WARN,
                    attempt,
                    delay_ms = policy.delay_for(attempt).as_millis() as u64,
                    "retrying after failed attempt"
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Failure {
        retryable: bool,
    }

    impl Retryable for Failure {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::network().capped_at(2);
        let result: Result<u32, Failure> = retry(&policy, |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(Failure { retryable: true })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::capacity();
        let result: Result<u32, Failure> = retry(&policy, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(Failure { retryable: false }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::server();
        let result: Result<u32, Failure> = retry(&policy, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(Failure { retryable: true }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn none_policy_never_delays() {
        assert_eq!(RetryPolicy::none().delay_for(1), Duration::ZERO);
    }

    #[test]
    fn exponential_delay_doubles() {
        let policy = RetryPolicy::server();
        assert_eq!(policy.delay_for(1), policy.base_delay);
        assert_eq!(policy.delay_for(2), policy.base_delay * 2);
        assert_eq!(policy.delay_for(3), policy.base_delay * 4);
    }

    #[test]
    fn linear_delay_scales_by_attempt() {
        let policy = RetryPolicy::network();
        assert_eq!(policy.delay_for(2), policy.base_delay * 2);
    }
}
