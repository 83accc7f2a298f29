// SPDX-License-Identifier: MIT OR Apache-2.0
//! Verification id generation and parsing.
//!
//! Format: `verif-YYYYMMDDHHMMSS-XXXX` — a 6-byte literal prefix, a 14-digit
//! UTC timestamp, a hyphen, and a 4-character uppercase-alphanumeric suffix.
//! The timestamp occupies byte offsets `6..20`, which is also the
//! last-resort parser FinalizeWithError uses when no `VerificationContext`
//! row exists yet (§4.14.5).

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;

const PREFIX: &str = "verif-";
const TIMESTAMP_RANGE: std::ops::Range<usize> = 6..20;
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a verification id for the given instant.
#[must_use]
pub fn generate_verification_id(at: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{PREFIX}{}-{suffix}", at.format("%Y%m%d%H%M%S"))
}

/// Parse the UTC instant encoded in a verification id's timestamp segment.
///
/// Returns `None` if the id is shorter than the expected layout or the
/// embedded timestamp does not parse.
#[must_use]
pub fn parse_verification_timestamp(verification_id: &str) -> Option<DateTime<Utc>> {
    let bytes = verification_id.as_bytes();
    if bytes.len() < TIMESTAMP_RANGE.end {
        return None;
    }
    let ts = verification_id.get(TIMESTAMP_RANGE)?;
    let naive = chrono::NaiveDateTime::parse_from_str(ts, "%Y%m%d%H%M%S").ok()?;
    Utc.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_round_trips_through_timestamp_parser() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 22).unwrap();
        let id = generate_verification_id(at);
        assert!(id.starts_with("verif-20240115143022-"));
        assert_eq!(id.len(), PREFIX.len() + 14 + 1 + 4);
        assert_eq!(parse_verification_timestamp(&id), Some(at));
    }

    #[test]
    fn rejects_short_ids() {
        assert_eq!(parse_verification_timestamp("verif-2024"), None);
    }

    #[test]
    fn suffix_is_uppercase_alphanumeric() {
        let at = Utc::now();
        let id = generate_verification_id(at);
        let suffix = &id[id.len() - 4..];
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
