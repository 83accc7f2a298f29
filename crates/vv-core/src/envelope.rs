// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::Status;

/// Step input/output schema version this crate speaks (§6).
pub const SCHEMA_VERSION: &str = "2.1.0";

/// The closed set of state-store categories (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Downloaded images and their base-64 encodings.
    Images,
    /// Rendered prompt text and descriptors.
    Prompts,
    /// Raw and processed model responses.
    Responses,
    /// Orchestrator-internal bookkeeping (initialization, historical, analysis).
    Processing,
    /// Terminal error payloads.
    Error,
}

impl Category {
    /// Directory segment used in state-store keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Prompts => "prompts",
            Self::Responses => "responses",
            Self::Processing => "processing",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(bucket, key, size)` pointer into the state store.
///
/// `key` has the normative shape
/// `{yyyy}/{mm}/{dd}/{verificationId}/{category}/{filename}` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Bucket (or root directory, for the filesystem-backed store) the object lives in.
    pub bucket: String,
    /// Full object key.
    pub key: String,
    /// Size in bytes of the stored object.
    pub size: u64,
}

/// Build the flat envelope-reference-map key for a `(category, filename)`
/// pair, e.g. `("images", "metadata") -> "images_metadata"`.
///
/// Callers pass the exact filename they stored under; this helper only
/// joins category and filename with the separator used throughout §6.
#[must_use]
pub fn flat_key(category: Category, filename: &str) -> String {
    format!("{}_{}", category.as_str(), filename)
}

/// The control-plane message threaded between pipeline steps (§3, §6).
///
/// Invariant (reference monotonicity, §8.1): every step MUST preserve all
/// references it received and MAY add new ones; see [`Envelope::merge_forward`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Schema version this envelope was produced under.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Verification id, format `verif-YYYYMMDDHHMMSS-XXXX`.
    pub verification_id: String,
    /// Mirrors `VerificationContext.status`.
    pub status: Status,
    /// Flat key -> Reference map; see [`flat_key`].
    #[serde(rename = "s3References")]
    pub references: BTreeMap<String, Reference>,
    /// Populated only by the terminal step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Raised when an envelope carries a schema version this build cannot accept.
#[derive(Debug, thiserror::Error)]
#[error("envelope schema version {found} is incompatible with {SCHEMA_VERSION}")]
pub struct SchemaVersionError {
    /// The schema version found on the incoming envelope.
    pub found: String,
}

impl Envelope {
    /// Create a fresh envelope at the start of a run.
    #[must_use]
    pub fn new(verification_id: impl Into<String>, status: Status) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            verification_id: verification_id.into(),
            status,
            references: BTreeMap::new(),
            summary: None,
        }
    }

    /// Verify the envelope's schema version is compatible with this build.
    ///
    /// Only the major component (the first dot-delimited segment) must
    /// match; a mismatched major version is `INVALID_INPUT` (§6).
    pub fn check_schema_version(&self) -> Result<(), SchemaVersionError> {
        let ours_major = SCHEMA_VERSION.split('.').next().unwrap_or(SCHEMA_VERSION);
        let theirs_major = self
            .schema_version
            .split('.')
            .next()
            .unwrap_or(&self.schema_version);
        if ours_major == theirs_major {
            Ok(())
        } else {
            Err(SchemaVersionError {
                found: self.schema_version.clone(),
            })
        }
    }

    /// Insert a reference under `flat_key(category, filename)`.
    ///
    /// Returns an error if a reference is already present under that key
    /// (write-once-read-many, invariant 4: key uniqueness).
    pub fn insert_reference(
        &mut self,
        category: Category,
        filename: &str,
        reference: Reference,
    ) -> Result<(), DuplicateReferenceError> {
        let key = flat_key(category, filename);
        if self.references.contains_key(&key) {
            return Err(DuplicateReferenceError { key });
        }
        self.references.insert(key, reference);
        Ok(())
    }

    /// Fetch a previously inserted reference by its flat key.
    #[must_use]
    pub fn reference(&self, flat_key: &str) -> Option<&Reference> {
        self.references.get(flat_key)
    }

    /// Advance `status`, validating the transition is legal (§8.2).
    pub fn advance(&mut self, next: Status) -> Result<(), InvalidTransitionError> {
        if !self.status.can_advance_to(next) {
            return Err(InvalidTransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Build the next envelope in the pipeline by cloning `self`'s references
    /// forward and [`advance`](Self::advance)-ing to `next`.
    ///
    /// This is the mechanism that makes both reference monotonicity
    /// (invariant 1, a step can only ever grow the reference map of the
    /// envelope it returns) and status-transition legality (invariant 2)
    /// structural rather than merely convention: a step cannot build an
    /// envelope carrying an illegal status transition.
    pub fn clone_forward(&self, next: Status) -> Result<Self, InvalidTransitionError> {
        let mut out = self.clone();
        out.advance(next)?;
        Ok(out)
    }

    /// Whether `self.references` is a subset of `other.references` with
    /// identical values for shared keys (invariant 1, reference monotonicity).
    #[must_use]
    pub fn is_prefix_of(&self, other: &Envelope) -> bool {
        self.references
            .iter()
            .all(|(k, v)| other.references.get(k) == Some(v))
    }
}

/// A flat key was already present when a step tried to insert a reference.
#[derive(Debug, thiserror::Error)]
#[error("duplicate reference key: {key}")]
pub struct DuplicateReferenceError {
    /// The key that was already present.
    pub key: String,
}

/// An illegal status transition was attempted.
#[derive(Debug, thiserror::Error)]
#[error("illegal status transition: {from} -> {to}")]
pub struct InvalidTransitionError {
    /// Status before the attempted transition.
    pub from: Status,
    /// Status that was rejected.
    pub to: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(n: u64) -> Reference {
        Reference {
            bucket: "test-bucket".into(),
            key: format!("2024/01/15/verif-x/images/{n}"),
            size: n,
        }
    }

    #[test]
    fn flat_key_joins_category_and_filename() {
        assert_eq!(flat_key(Category::Images, "metadata"), "images_metadata");
        assert_eq!(
            flat_key(Category::Prompts, "system-prompt"),
            "prompts_system-prompt"
        );
    }

    #[test]
    fn insert_reference_rejects_duplicates() {
        let mut env = Envelope::new("verif-x", Status::VerificationInitialized);
        env.insert_reference(Category::Images, "metadata", reference(10))
            .unwrap();
        let err = env
            .insert_reference(Category::Images, "metadata", reference(20))
            .unwrap_err();
        assert_eq!(err.key, "images_metadata");
    }

    #[test]
    fn clone_forward_preserves_references_and_advances_status() {
        let mut env = Envelope::new("verif-x", Status::VerificationInitialized);
        env.insert_reference(Category::Images, "metadata", reference(10))
            .unwrap();
        let mut next = env.clone_forward(Status::ImagesFetched).unwrap();
        next.insert_reference(Category::Prompts, "system-prompt", reference(20))
            .unwrap();

        assert!(env.is_prefix_of(&next));
        assert_eq!(next.references.len(), 2);
        assert_eq!(next.status, Status::ImagesFetched);
    }

    #[test]
    fn clone_forward_rejects_an_illegal_transition() {
        let env = Envelope::new("verif-x", Status::Turn1Completed);
        let err = env.clone_forward(Status::VerificationInitialized).unwrap_err();
        assert_eq!(err.from, Status::Turn1Completed);
        assert_eq!(err.to, Status::VerificationInitialized);
    }

    #[test]
    fn schema_version_check_accepts_same_major() {
        let mut env = Envelope::new("verif-x", Status::VerificationInitialized);
        env.schema_version = "2.0.9".to_string();
        assert!(env.check_schema_version().is_ok());
    }

    #[test]
    fn schema_version_check_rejects_other_major() {
        let mut env = Envelope::new("verif-x", Status::VerificationInitialized);
        env.schema_version = "1.9.0".to_string();
        assert!(env.check_schema_version().is_err());
    }

    #[test]
    fn advance_rejects_illegal_transition() {
        let mut env = Envelope::new("verif-x", Status::Turn1Completed);
        assert!(env.advance(Status::VerificationInitialized).is_err());
        assert!(env.advance(Status::Turn2Completed).is_ok());
    }
}
