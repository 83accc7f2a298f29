// SPDX-License-Identifier: MIT OR Apache-2.0
use std::fmt;

use serde::{Deserialize, Serialize};

/// The two supported comparison modes (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationType {
    /// Compare a checking image against a known planogram reference.
    LayoutVsChecking,
    /// Compare a new checking image against a prior verification's checking image.
    PreviousVsCurrent,
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LayoutVsChecking => "LAYOUT_VS_CHECKING",
            Self::PreviousVsCurrent => "PREVIOUS_VS_CURRENT",
        };
        f.write_str(s)
    }
}

/// The closed set of status constants a verification can carry (§4.1).
///
/// Success statuses form a strict sequence; failure statuses are terminal and
/// never followed by another status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Initial state before Initialize runs.
    VerificationRequested,
    /// Initialize succeeded.
    VerificationInitialized,
    /// FetchHistorical succeeded (`PREVIOUS_VS_CURRENT` only).
    HistoricalContextLoaded,
    /// FetchImages succeeded.
    ImagesFetched,
    /// PrepareSystemPrompt succeeded.
    PromptPrepared,
    /// ExecuteTurn1 succeeded.
    Turn1Completed,
    /// ExecuteTurn2 succeeded.
    Turn2Completed,
    /// FinalizeAndStore has parsed and written the terminal record.
    ResultsFinalized,
    /// Terminal success state.
    Completed,
    /// Initialize rejected the request.
    InitializationFailed,
    /// FetchHistorical could not find the prior verification.
    HistoricalFetchFailed,
    /// FetchImages could not obtain both images.
    ImageFetchFailed,
    /// ExecuteTurn1 or ExecuteTurn2 could not obtain a usable model response.
    BedrockProcessingFailed,
    /// Generic terminal failure not covered by a more specific status.
    VerificationFailed,
}

impl Status {
    /// Returns the success-path rank (0-based), or `None` for failure statuses.
    ///
    /// Used to check invariant 2 (status monotonicity): along a successful
    /// path each rank is visited at most once and only in increasing order.
    #[must_use]
    pub fn success_rank(self) -> Option<u8> {
        match self {
            Self::VerificationRequested => Some(0),
            Self::VerificationInitialized => Some(1),
            Self::HistoricalContextLoaded => Some(2),
            Self::ImagesFetched => Some(3),
            Self::PromptPrepared => Some(4),
            Self::Turn1Completed => Some(5),
            Self::Turn2Completed => Some(6),
            Self::ResultsFinalized => Some(7),
            Self::Completed => Some(8),
            _ => None,
        }
    }

    /// Whether this status is one of the terminal `*_FAILED` values.
    #[must_use]
    pub fn is_failure(self) -> bool {
        self.success_rank().is_none()
    }

    /// Whether this status is terminal (either `Completed` or any failure).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed) || self.is_failure()
    }

    /// Stable wire string, e.g. `"VERIFICATION_INITIALIZED"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VerificationRequested => "VERIFICATION_REQUESTED",
            Self::VerificationInitialized => "VERIFICATION_INITIALIZED",
            Self::HistoricalContextLoaded => "HISTORICAL_CONTEXT_LOADED",
            Self::ImagesFetched => "IMAGES_FETCHED",
            Self::PromptPrepared => "PROMPT_PREPARED",
            Self::Turn1Completed => "TURN1_COMPLETED",
            Self::Turn2Completed => "TURN2_COMPLETED",
            Self::ResultsFinalized => "RESULTS_FINALIZED",
            Self::Completed => "COMPLETED",
            Self::InitializationFailed => "INITIALIZATION_FAILED",
            Self::HistoricalFetchFailed => "HISTORICAL_FETCH_FAILED",
            Self::ImageFetchFailed => "IMAGE_FETCH_FAILED",
            Self::BedrockProcessingFailed => "BEDROCK_PROCESSING_FAILED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
        }
    }

    /// Whether `next` is a legal forward transition from `self` on the
    /// success path (strictly increasing rank, or a failure status from any
    /// non-terminal state).
    #[must_use]
    pub fn can_advance_to(self, next: Status) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.success_rank(), next.success_rank()) {
            (Some(a), Some(b)) => b > a,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in `VerificationContext.statusHistory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    /// Status reached.
    pub status: Status,
    /// When this status was reached.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The step function that produced this transition.
    pub function_name: String,
    /// Stage identifier (mirrors `errorStage` naming for failures).
    pub stage: String,
    /// Free-form metrics captured at this transition (latency, token counts, …).
    #[serde(default)]
    pub metrics: std::collections::BTreeMap<String, serde_json::Value>,
}
