// SPDX-License-Identifier: MIT OR Apache-2.0
use serde::{Deserialize, Serialize};

/// The structured output of the Parser (§3, §4.6).
///
/// `verification_status` is accepted verbatim from the model's output (or
/// derived from counts) and is **not** restricted to `{CORRECT, INCORRECT}`
/// — see the open-question decision recorded in `DESIGN.md`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    /// Total positions checked, if found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_positions_checked: Option<u32>,
    /// Positions that matched the reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_positions: Option<u32>,
    /// Positions that did not match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discrepant_positions: Option<u32>,
    /// Products missing from the checking image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_products: Option<u32>,
    /// Positions holding the wrong product type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incorrect_product_types: Option<u32>,
    /// Products present but not expected at that position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unexpected_products: Option<u32>,
    /// Positions that are empty in the checking image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_positions: Option<u32>,
    /// Original accuracy string, e.g. `"83.3% (35/42)"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_accuracy: Option<String>,
    /// Original confidence string, preserved verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<String>,
    /// Accepted verbatim from the model output; empty string if nothing matched.
    #[serde(default)]
    pub verification_status: String,
    /// Free-text outcome / narrative summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Free text captured from an `INITIAL CONFIRMATION` section, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_confirmation: Option<String>,
}

impl VerificationSummary {
    /// Whether the parser found nothing usable at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.verification_status.is_empty() && self.total_positions_checked.is_none()
    }
}
