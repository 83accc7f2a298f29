// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Domain types shared across the vending-verification pipeline:
//! the envelope/reference model, the status state machine, per-stage
//! context, image and conversation records, and the parsed verification
//! summary.
//!
//! Downstream crates (`vv-state-store`, `vv-records`, `vv-runtime`, ...)
//! depend on this crate rather than redefining these shapes locally.

pub mod context;
pub mod conversation;
pub mod envelope;
pub mod id;
pub mod image;
pub mod keys;
pub mod request;
pub mod status;
pub mod summary;

pub use context::{ErrorTracking, RequestMetadata, ResourceValidation, TurnTimestamps, VerificationContext};
pub use conversation::{ConversationTurn, TokenUsage, TurnStatus};
pub use envelope::{Category, DuplicateReferenceError, Envelope, InvalidTransitionError, Reference, SchemaVersionError, SCHEMA_VERSION};
pub use id::{generate_verification_id, parse_verification_timestamp};
pub use image::{EnhancedImageMetadata, ImageData, ImageFormat, ImageValidation, MAX_BASE64_SIZE_BYTES};
pub use keys::{build_key, validate_key, KeyError};
pub use request::VerificationRequest;
pub use status::{Status, StatusHistoryEntry, VerificationType};
pub use summary::VerificationSummary;
