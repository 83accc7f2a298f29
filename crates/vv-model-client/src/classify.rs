// SPDX-License-Identifier: MIT OR Apache-2.0
//! Substring-based error classification (§4.4, normative).

use vv_retry::RetryPolicy;

/// The four classification buckets the Converse contract defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifiedCategory {
    /// `throttling`/`rate limit` substrings: retry jittered, up to 5.
    Capacity,
    /// `validation`/`invalid` substrings: non-retryable.
    Client,
    /// `timeout` substring: retry linear, up to 2.
    Network,
    /// Anything else: retry exponential, up to 3.
    Server,
}

impl ClassifiedCategory {
    /// Classify a raw error message, checked in the normative order:
    /// throttling, then validation, then timeout, else server.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("throttling") || lower.contains("rate limit") {
            Self::Capacity
        } else if lower.contains("validation") || lower.contains("invalid") {
            Self::Client
        } else if lower.contains("timeout") {
            Self::Network
        } else {
            Self::Server
        }
    }

    /// The [`RetryPolicy`] this classification maps onto.
    #[must_use]
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            Self::Capacity => RetryPolicy::capacity(),
            Self::Client => RetryPolicy::none(),
            Self::Network => RetryPolicy::network(),
            Self::Server => RetryPolicy::server(),
        }
    }

    /// Whether this classification is ever retryable.
    #[must_use]
    pub fn retryable(self) -> bool {
        !matches!(self, Self::Client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_throttling_as_capacity() {
        assert_eq!(
            ClassifiedCategory::classify("ThrottlingException: rate limit exceeded"),
            ClassifiedCategory::Capacity
        );
    }

    #[test]
    fn classifies_validation_as_client() {
        assert_eq!(
            ClassifiedCategory::classify("ValidationException: invalid image format"),
            ClassifiedCategory::Client
        );
        assert!(!ClassifiedCategory::Client.retryable());
    }

    #[test]
    fn classifies_timeout_as_network() {
        assert_eq!(
            ClassifiedCategory::classify("connect timeout after 5000ms"),
            ClassifiedCategory::Network
        );
    }

    #[test]
    fn classifies_unknown_as_server() {
        assert_eq!(
            ClassifiedCategory::classify("internal server error"),
            ClassifiedCategory::Server
        );
    }

    #[test]
    fn throttling_takes_precedence_over_timeout_wording() {
        let message = "throttling: please retry, request timeout pending";
        assert_eq!(ClassifiedCategory::classify(message), ClassifiedCategory::Capacity);
    }
}
