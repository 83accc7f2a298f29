// SPDX-License-Identifier: MIT OR Apache-2.0
//! Centralized state-store key construction (§4.2, §9).
//!
//! Historically this logic lived ad-hoc at each call site and occasionally
//! duplicated the verification id segment. It is centralized here so
//! `StateStore::attach` has a single, defensively-checked implementation.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::envelope::Category;

/// A key would have violated the "exactly one verification id segment, one
/// date triple" rule (§4.2 normative key construction rule).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The verification id appeared more than once in the candidate key.
    #[error("verification id {verification_id} appears more than once in key {key}")]
    DuplicateVerificationId {
        /// The offending verification id.
        verification_id: String,
        /// The key that was rejected.
        key: String,
    },
    /// More than one `{yyyy}/{mm}/{dd}` triple was found in the candidate key.
    #[error("key {key} contains a nested date path")]
    NestedDatePath {
        /// The key that was rejected.
        key: String,
    },
}

/// Build the normative key `{yyyy}/{mm}/{dd}/{verificationId}/{category}/{filename}`.
///
/// The date is derived from `verification_at`, never from wall-clock time
/// (invariant 5: date alignment).
#[must_use]
pub fn build_key(
    verification_at: DateTime<Utc>,
    verification_id: &str,
    category: Category,
    filename: &str,
) -> String {
    format!(
        "{}/{}/{}/{verification_id}/{}/{filename}",
        verification_at.format("%Y"),
        verification_at.format("%m"),
        verification_at.format("%d"),
        category.as_str(),
    )
}

/// Reject a key that duplicates the verification id or nests a second date
/// triple, per §4.2's normative rule and the §9 redesign note on the
/// historically observed duplicated-id bug.
pub fn validate_key(key: &str, verification_id: &str) -> Result<(), KeyError> {
    let occurrences = key.matches(verification_id).count();
    if occurrences != 1 {
        return Err(KeyError::DuplicateVerificationId {
            verification_id: verification_id.to_string(),
            key: key.to_string(),
        });
    }

    let segments: Vec<&str> = key.split('/').collect();
    let date_triples = segments
        .windows(3)
        .filter(|w| w.iter().all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        .count();
    if date_triples > 1 {
        return Err(KeyError::NestedDatePath {
            key: key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn build_key_matches_normative_shape() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 22).unwrap();
        let key = build_key(at, "verif-x", Category::Images, "metadata");
        assert_eq!(key, "2024/01/15/verif-x/images/metadata");
    }

    #[test]
    fn validate_key_accepts_well_formed_key() {
        assert!(validate_key("2024/01/15/verif-x/images/metadata", "verif-x").is_ok());
    }

    #[test]
    fn validate_key_rejects_duplicated_verification_id() {
        let key = "2024/01/15/verif-x/verif-x/images/metadata";
        let err = validate_key(key, "verif-x").unwrap_err();
        assert!(matches!(err, KeyError::DuplicateVerificationId { .. }));
    }

    #[test]
    fn validate_key_rejects_nested_date_triple() {
        let key = "2024/01/15/verif-x/2024/01/15/images/metadata";
        let err = validate_key(key, "verif-x").unwrap_err();
        assert!(matches!(err, KeyError::NestedDatePath { .. }));
    }
}
