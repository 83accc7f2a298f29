// SPDX-License-Identifier: MIT OR Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a single conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnStatus {
    /// The turn completed and produced a usable response.
    Completed,
    /// The turn was abandoned because the run failed.
    FailedWorkflow,
}

/// Token accounting for a single model call (§4.4, invariant 8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Input (prompt) tokens.
    pub input_tokens: u64,
    /// Output (completion) tokens.
    pub output_tokens: u64,
    /// Thinking/reasoning tokens; zero when `THINKING_TYPE=disable`.
    pub thinking_tokens: u64,
    /// Must equal `input_tokens + output_tokens + thinking_tokens`.
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Construct a usage record, computing `total_tokens` so invariant 8
    /// holds by construction.
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64, thinking_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            thinking_tokens,
            total_tokens: input_tokens + output_tokens + thinking_tokens,
        }
    }

    /// Whether the arithmetic identity (invariant 8) holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total_tokens == self.input_tokens + self.output_tokens + self.thinking_tokens
    }
}

/// One row of `ConversationHistory` (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    /// Owning verification.
    pub verification_id: String,
    /// `1` or `2`.
    pub turn_id: u8,
    /// When this turn was recorded.
    pub conversation_at: DateTime<Utc>,
    /// Lifecycle status.
    pub turn_status: TurnStatus,
    /// Rendered user prompt text. Must be non-null for Turn 1 (invariant 6).
    pub prompt: Option<String>,
    /// Raw assistant response text.
    pub response: Option<String>,
    /// Token accounting.
    pub token_usage: TokenUsage,
    /// Model-assigned request id.
    pub model_request_id: String,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// Optional model "thinking" content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_new_satisfies_arithmetic_identity() {
        let usage = TokenUsage::new(100, 50, 25);
        assert_eq!(usage.total_tokens, 175);
        assert!(usage.is_consistent());
    }

    #[test]
    fn token_usage_consistent_even_when_thinking_disabled() {
        let usage = TokenUsage::new(100, 50, 0);
        assert!(usage.is_consistent());
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn detects_tampered_total() {
        let mut usage = TokenUsage::new(10, 10, 0);
        usage.total_tokens = 999;
        assert!(!usage.is_consistent());
    }
}
