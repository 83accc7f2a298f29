// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Turns a Turn-2 assistant reply into a [`VerificationSummary`] (§4.6).
//!
//! Three pure recognizers are tried in order — JSON, then a colon-delimited
//! Markdown section, then a bold-bullet Markdown section — and the public
//! [`parse`] entry point returns the first `Some`, falling back to an
//! all-empty summary. Each recognizer is a plain function over `&str`; none
//! hold state, so `parse` is idempotent by construction (invariant 7).

mod sections;

use vv_core::VerificationSummary;

/// Parse a Turn-2 reply into a [`VerificationSummary`].
///
/// Never fails: if nothing recognizable is found, returns an all-empty
/// summary (treated by `FinalizeAndStore` as a soft warning, not a failure).
#[must_use]
pub fn parse(reply: &str) -> VerificationSummary {
    recognize_json(reply)
        .or_else(|| recognize_markdown_colon(reply))
        .or_else(|| recognize_markdown_bullet(reply))
        .unwrap_or_default()
}

/// Attempt 1: the reply (or its first `{...}` object) is JSON carrying a
/// non-empty `verificationStatus`.
#[must_use]
pub fn recognize_json(reply: &str) -> Option<VerificationSummary> {
    if let Ok(summary) = serde_json::from_str::<VerificationSummary>(reply.trim()) {
        if !summary.verification_status.is_empty() {
            return Some(summary);
        }
    }
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = &reply[start..=end];
    let summary: VerificationSummary = serde_json::from_str(candidate).ok()?;
    (!summary.verification_status.is_empty()).then_some(summary)
}

/// Attempt 2: a `VERIFICATION SUMMARY` section with `key: value` or
/// `- key: value` lines.
#[must_use]
pub fn recognize_markdown_colon(reply: &str) -> Option<VerificationSummary> {
    let section = sections::find_section(reply, "VERIFICATION SUMMARY")?;
    let pairs = sections::parse_colon_lines(section);
    build_summary(reply, pairs)
}

/// Attempt 3: a `VERIFICATION SUMMARY` section with `* **KEY:** value` lines.
#[must_use]
pub fn recognize_markdown_bullet(reply: &str) -> Option<VerificationSummary> {
    let section = sections::find_section(reply, "VERIFICATION SUMMARY")?;
    let pairs = sections::parse_bullet_lines(section);
    build_summary(reply, pairs)
}

fn build_summary(
    reply: &str,
    pairs: Vec<(String, String)>,
) -> Option<VerificationSummary> {
    if pairs.is_empty() {
        return None;
    }
    let mut summary = VerificationSummary::default();
    for (key, value) in &pairs {
        match key.as_str() {
            "totalpositionschecked" => summary.total_positions_checked = parse_u32(value),
            "correctpositions" => summary.correct_positions = parse_u32(value),
            "discrepantpositions" => summary.discrepant_positions = parse_u32(value),
            "missingproducts" => summary.missing_products = parse_u32(value),
            "incorrectproducttypes" => summary.incorrect_product_types = parse_u32(value),
            "unexpectedproducts" => summary.unexpected_products = parse_u32(value),
            "emptypositions" => summary.empty_positions = parse_u32(value),
            "overallaccuracy" => summary.overall_accuracy = Some(value.clone()),
            "overallconfidence" => summary.overall_confidence = Some(value.clone()),
            "verificationstatus" => summary.verification_status = value.clone(),
            "outcome" => summary.outcome = Some(value.clone()),
            _ => {}
        }
    }
    if let Some(confirmation) = sections::find_section(reply, "INITIAL CONFIRMATION") {
        let trimmed = confirmation.trim();
        if !trimmed.is_empty() {
            summary.initial_confirmation = Some(trimmed.to_string());
        }
    }
    if summary.verification_status.is_empty() {
        summary.verification_status = match summary.discrepant_positions {
            Some(0) => "CORRECT".to_string(),
            Some(_) => "INCORRECT".to_string(),
            None => String::new(),
        };
    }
    Some(summary)
}

fn parse_u32(value: &str) -> Option<u32> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_reply() {
        let reply = r#"{"verificationStatus": "CORRECT", "discrepantPositions": 0}"#;
        let summary = parse(reply);
        assert_eq!(summary.verification_status, "CORRECT");
        assert_eq!(summary.discrepant_positions, Some(0));
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let reply = "Here is my analysis:\n\n{\"verificationStatus\": \"INCORRECT\", \"discrepantPositions\": 2}\n\nThanks.";
        let summary = parse(reply);
        assert_eq!(summary.verification_status, "INCORRECT");
    }

    #[test]
    fn parses_colon_markdown_section() {
        let reply = "\
VERIFICATION SUMMARY
Total Positions Checked: 42
Correct Positions: 35
Discrepant Positions: 7
Overall Accuracy: 83.3% (35/42)
Overall Confidence: high
Verification Status: INCORRECT
";
        let summary = parse(reply);
        assert_eq!(summary.total_positions_checked, Some(42));
        assert_eq!(summary.correct_positions, Some(35));
        assert_eq!(summary.overall_accuracy.as_deref(), Some("83.3% (35/42)"));
        assert_eq!(summary.verification_status, "INCORRECT");
    }

    #[test]
    fn parses_bullet_markdown_section() {
        let reply = "\
VERIFICATION SUMMARY
* **TOTAL POSITIONS CHECKED:** 10
* **DISCREPANT POSITIONS:** 0
* **VERIFICATION STATUS:** CORRECT
";
        let summary = parse(reply);
        assert_eq!(summary.total_positions_checked, Some(10));
        assert_eq!(summary.discrepant_positions, Some(0));
        assert_eq!(summary.verification_status, "CORRECT");
    }

    #[test]
    fn infers_status_from_counts_when_absent() {
        let reply = "\
VERIFICATION SUMMARY
Total Positions Checked: 5
Discrepant Positions: 0
";
        let summary = parse(reply);
        assert_eq!(summary.verification_status, "CORRECT");
    }

    #[test]
    fn captures_initial_confirmation_section() {
        let reply = "\
INITIAL CONFIRMATION
The reference image shows 10 labeled positions.

VERIFICATION SUMMARY
Total Positions Checked: 10
Discrepant Positions: 0
";
        let summary = parse(reply);
        assert_eq!(
            summary.initial_confirmation.as_deref(),
            Some("The reference image shows 10 labeled positions.")
        );
    }

    #[test]
    fn unrecognizable_reply_yields_empty_summary() {
        let summary = parse("I could not determine anything useful.");
        assert!(summary.is_empty());
    }

    #[test]
    fn parse_is_idempotent() {
        let reply = r#"{"verificationStatus": "CORRECT"}"#;
        let once = parse(reply);
        let twice = parse(reply);
        assert_eq!(once, twice);
    }
}
